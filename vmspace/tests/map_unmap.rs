mod common;

use common::{layout, page_aspace, user_aspace, vmo_with, BASE};
use vmspace::test_utils::TestFrameAllocator;
use vmspace::{
    AddressRangeExt, Error, Permissions, Placement, RegionKind, VirtualAddress, PAGE_SIZE,
};

const RW: Permissions = Permissions::READ.union(Permissions::WRITE);

#[test]
fn three_low_mappings_land_consecutively() {
    let frame_alloc = TestFrameAllocator::new().leak();
    let mut aspace = user_aspace();

    for index in 0..3 {
        let vmo = vmo_with(frame_alloc, 1);
        let base = aspace
            .map(vmo, None, PAGE_SIZE, RW, Placement::PreferLow)
            .unwrap();
        assert_eq!(base, VirtualAddress::new(BASE + index * PAGE_SIZE));
    }

    assert_eq!(aspace.resident_size(), 3 * PAGE_SIZE);
    assert_eq!(aspace.arch().translation_count(), 3);
}

#[test]
fn freeing_the_middle_page_leaves_bound_neighbors() {
    let frame_alloc = TestFrameAllocator::new().leak();
    let mut aspace = user_aspace();

    for _ in 0..3 {
        let vmo = vmo_with(frame_alloc, 1);
        aspace
            .map(vmo, None, PAGE_SIZE, RW, Placement::PreferLow)
            .unwrap();
    }

    aspace
        .unmap(VirtualAddress::new(BASE + PAGE_SIZE), PAGE_SIZE)
        .unwrap();

    let middle = aspace.lookup(VirtualAddress::new(BASE + PAGE_SIZE)).unwrap();
    assert!(middle.is_free());
    assert_eq!(middle.range().size(), PAGE_SIZE);

    let low = aspace.lookup(VirtualAddress::new(BASE)).unwrap();
    assert!(!low.is_free());
    assert_eq!(low.range().end, VirtualAddress::new(BASE + PAGE_SIZE));

    let high = aspace
        .lookup(VirtualAddress::new(BASE + 2 * PAGE_SIZE))
        .unwrap();
    assert!(!high.is_free());
    assert_eq!(high.range().start, VirtualAddress::new(BASE + 2 * PAGE_SIZE));

    assert_eq!(aspace.resident_size(), 2 * PAGE_SIZE);
    assert_eq!(aspace.arch().translation_count(), 2);
}

#[test]
fn freeing_the_first_page_merges_across_the_freed_middle() {
    let frame_alloc = TestFrameAllocator::new().leak();
    let mut aspace = user_aspace();

    for _ in 0..3 {
        let vmo = vmo_with(frame_alloc, 1);
        aspace
            .map(vmo, None, PAGE_SIZE, RW, Placement::PreferLow)
            .unwrap();
    }

    aspace
        .unmap(VirtualAddress::new(BASE + PAGE_SIZE), PAGE_SIZE)
        .unwrap();
    aspace.unmap(VirtualAddress::new(BASE), PAGE_SIZE).unwrap();

    // the two freed pages must have coalesced into one region
    let merged = aspace.lookup(VirtualAddress::new(BASE)).unwrap();
    assert!(merged.is_free());
    assert_eq!(merged.range().start, VirtualAddress::new(BASE));
    assert_eq!(merged.range().end, VirtualAddress::new(BASE + 2 * PAGE_SIZE));
}

#[test]
fn map_unmap_round_trip_restores_the_layout() {
    let frame_alloc = TestFrameAllocator::new().leak();
    let mut aspace = page_aspace(16);

    // pre-existing neighborhood so the round trip crosses region boundaries
    let anchor = vmo_with(frame_alloc, 1);
    aspace
        .map(
            anchor,
            Some(VirtualAddress::new(BASE + 4 * PAGE_SIZE)),
            PAGE_SIZE,
            RW,
            Placement::PreferLow,
        )
        .unwrap();

    let before = layout(&aspace);

    let vmo = vmo_with(frame_alloc, 3);
    let base = aspace
        .map(vmo, None, 3 * PAGE_SIZE, RW, Placement::PreferLow)
        .unwrap();
    aspace.unmap(base, 3 * PAGE_SIZE).unwrap();

    assert_eq!(layout(&aspace), before);
}

#[test]
fn unmap_spanning_multiple_mappings() {
    let frame_alloc = TestFrameAllocator::new().leak();
    let mut aspace = page_aspace(16);

    let low = vmo_with(frame_alloc, 2);
    let high = vmo_with(frame_alloc, 1);
    aspace
        .map(
            low,
            Some(VirtualAddress::new(BASE)),
            2 * PAGE_SIZE,
            RW,
            Placement::PreferLow,
        )
        .unwrap();
    aspace
        .map(
            high,
            Some(VirtualAddress::new(BASE + 2 * PAGE_SIZE)),
            PAGE_SIZE,
            RW,
            Placement::PreferLow,
        )
        .unwrap();

    aspace.unmap(VirtualAddress::new(BASE), 3 * PAGE_SIZE).unwrap();

    assert_eq!(layout(&aspace), [(BASE, BASE + 16 * PAGE_SIZE, true)]);
    assert_eq!(aspace.resident_size(), 0);
    assert_eq!(aspace.arch().translation_count(), 0);
}

#[test]
fn unmap_rejects_partial_regions_and_free_ranges() {
    let frame_alloc = TestFrameAllocator::new().leak();
    let mut aspace = page_aspace(16);

    let vmo = vmo_with(frame_alloc, 2);
    let base = aspace
        .map(vmo, None, 2 * PAGE_SIZE, RW, Placement::PreferLow)
        .unwrap();

    // half of a two-page mapping
    assert_eq!(
        aspace.unmap(base, PAGE_SIZE).unwrap_err(),
        Error::RangeNotMapped
    );
    // starts mapped but runs into free space
    assert_eq!(
        aspace.unmap(base, 3 * PAGE_SIZE).unwrap_err(),
        Error::RangeNotMapped
    );
    // entirely free
    assert_eq!(
        aspace
            .unmap(VirtualAddress::new(BASE + 8 * PAGE_SIZE), PAGE_SIZE)
            .unwrap_err(),
        Error::RangeNotMapped
    );
    // outside the managed range
    assert_eq!(
        aspace
            .unmap(VirtualAddress::new(BASE + 32 * PAGE_SIZE), PAGE_SIZE)
            .unwrap_err(),
        Error::RangeNotMapped
    );
    // bad alignment and length
    assert_eq!(
        aspace.unmap(VirtualAddress::new(BASE + 1), PAGE_SIZE).unwrap_err(),
        Error::Misaligned
    );
    assert_eq!(aspace.unmap(base, 0).unwrap_err(), Error::InvalidLength);

    // nothing was modified along the way
    assert_eq!(aspace.resident_size(), 2 * PAGE_SIZE);
    aspace.assert_invariants();
}

#[test]
fn translations_match_the_vmo_frames() {
    let frame_alloc = TestFrameAllocator::new().leak();
    let mut aspace = page_aspace(8);

    let vmo = vmo_with(frame_alloc, 2);
    let base = aspace
        .map(vmo.clone(), None, 2 * PAGE_SIZE, RW, Placement::PreferLow)
        .unwrap();

    for index in 0..2 {
        let virt = VirtualAddress::new(base.get() + index * PAGE_SIZE);
        let (phys, permissions) = aspace.arch().translation(virt).unwrap();
        assert_eq!(Some(phys), vmo.frame(index));
        assert_eq!(permissions, RW);
    }

    // every mutation batch ends in one TLB invalidation covering its range
    let invalidations = aspace.arch().invalidations();
    assert!(!invalidations.is_empty());
    let last = invalidations.last().unwrap();
    assert_eq!(last.start, base);
    assert_eq!(last.end, VirtualAddress::new(base.get() + 2 * PAGE_SIZE));
}

#[test]
fn shared_vmo_outlives_individual_mappings() {
    let frame_alloc = TestFrameAllocator::new().leak();
    let mut aspace = page_aspace(16);

    let vmo = vmo_with(frame_alloc, 1);
    assert_eq!(frame_alloc.live_frames(), 1);

    // the same vmo bound twice, shared-memory style
    let first = aspace
        .map(vmo.clone(), None, PAGE_SIZE, RW, Placement::PreferLow)
        .unwrap();
    let second = aspace
        .map(vmo.clone(), None, PAGE_SIZE, Permissions::READ, Placement::PreferLow)
        .unwrap();

    aspace.unmap(first, PAGE_SIZE).unwrap();
    assert_eq!(frame_alloc.live_frames(), 1);
    aspace.unmap(second, PAGE_SIZE).unwrap();
    assert_eq!(frame_alloc.live_frames(), 1);

    // the frames die with the last reference
    drop(vmo);
    assert_eq!(frame_alloc.live_frames(), 0);
}

#[test]
fn dropping_the_address_space_releases_vmo_references() {
    let frame_alloc = TestFrameAllocator::new().leak();
    let mut aspace = page_aspace(8);

    let vmo = vmo_with(frame_alloc, 2);
    aspace
        .map(vmo, None, 2 * PAGE_SIZE, RW, Placement::PreferLow)
        .unwrap();
    assert_eq!(frame_alloc.live_frames(), 2);

    // the address space held the last reference
    drop(aspace);
    assert_eq!(frame_alloc.live_frames(), 0);
}

#[test]
fn protect_shrinks_permissions() {
    let frame_alloc = TestFrameAllocator::new().leak();
    let mut aspace = page_aspace(8);

    let vmo = vmo_with(frame_alloc, 2);
    let base = aspace
        .map(vmo, None, 2 * PAGE_SIZE, RW, Placement::PreferLow)
        .unwrap();

    aspace.protect(base, 2 * PAGE_SIZE, Permissions::READ).unwrap();

    let region = aspace.lookup(base).unwrap();
    let RegionKind::Bound { permissions, .. } = region.kind() else {
        panic!("protected region must stay bound");
    };
    assert_eq!(*permissions, Permissions::READ);
    let (_, permissions) = aspace.arch().translation(base).unwrap();
    assert_eq!(permissions, Permissions::READ);

    // growing permissions back is refused
    assert_eq!(
        aspace.protect(base, 2 * PAGE_SIZE, RW).unwrap_err(),
        Error::PermissionIncrease
    );
}
