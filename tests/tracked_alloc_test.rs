use tally::alloc::{AllocationStats, DumpFormat, OperationKind, DEFAULT_ALIGN};
use tally::{site, AllocError, AllocatorConfig, AnomalyKind, BlockKind, Site, TrackedAllocator};

fn logging_allocator() -> TrackedAllocator {
    TrackedAllocator::with_config(AllocatorConfig::default().with_operation_log(true))
}

#[test]
fn allocate_then_deallocate_has_no_net_effect() {
    let alloc = TrackedAllocator::new();
    let keep = alloc.allocate(24, site!()).unwrap();
    let before = alloc.ledger().statistics();
    let live_before = alloc.ledger().len();

    let ptr = alloc.allocate(100, site!()).unwrap();
    unsafe { alloc.deallocate(ptr.as_ptr(), site!()) };

    let after = alloc.ledger().statistics();
    assert_eq!(alloc.ledger().len(), live_before);
    assert_eq!(after.live_blocks(), before.live_blocks());
    assert_eq!(after.live_bytes(), before.live_bytes());
    assert_eq!(after.allocated_bytes - before.allocated_bytes, 100);
    assert_eq!(after.freed_bytes - before.freed_bytes, 100);

    unsafe { alloc.deallocate(keep.as_ptr(), site!()) };
    assert!(alloc.ledger().is_empty());
}

#[test]
fn reallocate_preserves_prefix_when_growing_and_shrinking() {
    let alloc = TrackedAllocator::new();
    let ptr = alloc.allocate(16, site!()).unwrap();
    unsafe {
        for i in 0..16u8 {
            ptr.as_ptr().add(usize::from(i)).write(i + 1);
        }

        let grown = alloc.reallocate(ptr.as_ptr(), 4096, site!()).unwrap();
        let bytes = core::slice::from_raw_parts(grown.as_ptr(), 4096);
        assert_eq!(&bytes[..16], &(1..=16).collect::<Vec<u8>>()[..]);
        assert!(bytes[16..].iter().all(|&b| b == 0));

        let shrunk = alloc.reallocate(grown.as_ptr(), 5, site!()).unwrap();
        assert_eq!(core::slice::from_raw_parts(shrunk.as_ptr(), 5), &[1, 2, 3, 4, 5]);

        let entry = alloc.ledger().block_for(shrunk.as_ptr()).unwrap();
        assert_eq!(entry.size, 5);
        assert_eq!(entry.kind, BlockKind::Single);
        assert_eq!(alloc.header_of(shrunk.as_ptr()).unwrap().size(), 5);

        alloc.deallocate(shrunk.as_ptr(), site!());
    }

    let stats = alloc.ledger().statistics();
    assert_eq!(stats.reallocations, 2);
    assert_eq!(stats.live_blocks(), 0);
    assert_eq!(stats.live_bytes(), 0);
    assert_eq!(stats.peak_live_bytes, 4096);
}

#[test]
fn reallocate_keeps_array_flag() {
    let alloc = TrackedAllocator::new();
    let ptr = alloc.allocate_array(8, site!()).unwrap();
    let moved = unsafe { alloc.reallocate(ptr.as_ptr(), 64, site!()) }.unwrap();
    assert!(alloc.ledger().block_for(moved.as_ptr()).unwrap().is_array());
    unsafe { alloc.deallocate(moved.as_ptr(), site!()) };
}

#[test]
fn deallocating_unknown_address_is_reported_not_fatal() {
    let alloc = TrackedAllocator::new();
    unsafe { alloc.deallocate(0xdead as *mut u8, Site::new(Some("caller"), "x.rs", 1, 1)) };

    let journal = alloc.ledger().journal();
    assert_eq!(journal.count(AnomalyKind::UnknownBlock), 1);
    let recent = journal.recent();
    assert_eq!(recent[0].address, 0xdead);
    assert_eq!(recent[0].operation, "deallocate");
    assert_eq!(recent[0].site.unwrap().function, Some("caller"));
    assert_eq!(alloc.ledger().statistics(), AllocationStats::default());
}

#[test]
fn double_free_is_caught_by_the_ledger() {
    let alloc = TrackedAllocator::new();
    let ptr = alloc.allocate(8, site!()).unwrap();
    unsafe {
        alloc.deallocate(ptr.as_ptr(), site!());
        alloc.deallocate(ptr.as_ptr(), site!());
    }
    assert_eq!(alloc.ledger().journal().count(AnomalyKind::UnknownBlock), 1);
    assert_eq!(alloc.ledger().statistics().freed_blocks, 1);
}

#[test]
fn deallocating_null_is_silent() {
    let alloc = TrackedAllocator::new();
    unsafe { alloc.deallocate(core::ptr::null_mut(), site!()) };
    assert!(alloc.ledger().journal().is_clean());
}

#[test]
fn impossible_size_is_a_layout_error() {
    let alloc = TrackedAllocator::new();
    assert_eq!(
        alloc.allocate(usize::MAX - 4, site!()).unwrap_err(),
        AllocError::LayoutOverflow {
            size: usize::MAX - 4,
            align: DEFAULT_ALIGN
        }
    );
}

#[test]
fn operation_log_is_chronological_with_sites() {
    let alloc = logging_allocator();
    let a = alloc.allocate(8, site!()).unwrap();
    let b = unsafe { alloc.reallocate(a.as_ptr(), 32, site!()) }.unwrap();
    unsafe { alloc.deallocate(b.as_ptr(), site!()) };

    let log = alloc.ledger().operation_log().unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].kind, OperationKind::Allocate);
    assert_eq!(log[1].kind, OperationKind::Reallocate { from: a.as_ptr() as usize });
    assert_eq!(log[2].kind, OperationKind::Deallocate);
    assert!(log.windows(2).all(|w| w[0].ordinal < w[1].ordinal));
    assert!(log.iter().all(|op| op.site.file.ends_with("tracked_alloc_test.rs")));
    assert!(log.iter().all(|op| op.site.function == Some(module_path!())));
}

#[test]
fn text_dump_follows_recording_mode() {
    let quiet = TrackedAllocator::with_config(AllocatorConfig::default().with_operation_log(false));
    let p = quiet.allocate(10, site!()).unwrap();
    let mut out = Vec::new();
    quiet.ledger().dump(&mut out, DumpFormat::Text).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("allocation statistics"));
    assert!(text.contains("allocated: 10 bytes in 1 blocks"));
    unsafe { quiet.deallocate(p.as_ptr(), site!()) };

    let verbose = logging_allocator();
    let p = verbose.allocate_array(10, site!()).unwrap();
    unsafe { verbose.deallocate(p.as_ptr(), site!()) };
    let mut out = Vec::new();
    verbose.ledger().dump(&mut out, DumpFormat::Text).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("allocation log (2 operations)"));
    assert!(text.contains("size=10 array=true"));
    assert!(text.contains("deallocate"));
}

#[test]
fn live_blocks_lists_leaks_oldest_first() {
    let alloc = TrackedAllocator::new();
    let first = alloc.allocate(1, site!()).unwrap();
    let second = alloc.allocate(2, site!()).unwrap();
    let third = alloc.allocate(3, site!()).unwrap();
    unsafe { alloc.deallocate(second.as_ptr(), site!()) };

    let live = alloc.ledger().live_blocks();
    assert_eq!(
        live.iter().map(|e| e.size).collect::<Vec<_>>(),
        vec![1, 3]
    );
    assert_eq!(live[0].address, first.as_ptr() as usize);

    unsafe {
        alloc.deallocate(first.as_ptr(), site!());
        alloc.deallocate(third.as_ptr(), site!());
    }
}
