use defrag_core::shutdown::CountdownTerminator;
use defrag_core::{
    BlockMap, FileFlags, JobContext, JobKind, JobOptions, JobOutcome, JobStatus, MemoryVolume,
    NeverTerminate, ProgressInfo, ShutdownFlag, SortOrder, Terminator, run_job,
};

fn run(volume: &mut MemoryVolume, kind: JobKind, options: JobOptions) -> JobOutcome {
    let name = volume.name().to_string();
    run_job(volume, &name, kind, options, &NeverTerminate, None)
}

fn first_lcn(volume: &MemoryVolume, path: &str) -> u64 {
    volume.file(path).and_then(|f| f.first_lcn()).unwrap()
}

/// No two file extents overlap, every map is gap-free in VCN space, and the
/// host's free and allocated clusters add up to the volume size.
fn assert_consistent(volume: &MemoryVolume) {
    let mut extents: Vec<(u64, u64)> = Vec::new();
    for f in volume.files() {
        assert!(f.blockmap.is_contiguous(), "{} has VCN gaps", f.path);
        extents.extend(f.blockmap.extents().map(|e| (e.lcn, e.length)));
    }
    extents.sort();
    for w in extents.windows(2) {
        assert!(w[0].0 + w[0].1 <= w[1].0, "overlap: {:?} and {:?}", w[0], w[1]);
    }
    assert_eq!(
        volume.free_clusters() + volume.allocated_clusters(),
        volume.total_clusters()
    );
    assert_eq!(volume.open_handle_count(), 0);
}

fn fragmented_pair() -> MemoryVolume {
    MemoryVolume::builder("C:", 200, 4096)
        .reserved(0, 10)
        .file("C:\\a", &[(10, 5), (50, 5)])
        .file("C:\\b", &[(15, 20)])
        .build()
}

#[test]
fn defragmentation_joins_fragments_in_first_fit() {
    let mut volume = fragmented_pair();
    let outcome = run(&mut volume, JobKind::Defragmentation, JobOptions::default());

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(
        volume.file("C:\\a").unwrap().blockmap,
        BlockMap::from_extents(&[(35, 10)])
    );
    assert_eq!(first_lcn(&volume, "C:\\b"), 15);
    assert_eq!(outcome.counters.total_moves, 1);
    assert_eq!(outcome.counters.moved_clusters, 10);
    assert_consistent(&volume);
}

#[test]
fn locked_file_makes_the_job_partial() {
    let mut volume = MemoryVolume::builder("C:", 200, 4096)
        .reserved(0, 10)
        .file("C:\\a", &[(10, 5), (50, 5)])
        .locked("C:\\a")
        .build();
    let outcome = run(&mut volume, JobKind::Defragmentation, JobOptions::default());

    assert_eq!(outcome.status, JobStatus::PartiallySucceeded);
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(outcome.counters.locked_files, 1);
    assert!(volume.moves().is_empty());
    assert_consistent(&volume);
}

#[test]
fn failing_moves_are_counted_not_fatal() {
    let mut volume = MemoryVolume::builder("C:", 200, 4096)
        .reserved(0, 10)
        .file("C:\\a", &[(10, 5), (50, 5)])
        .failing("C:\\a")
        .build();
    let outcome = run(&mut volume, JobKind::Defragmentation, JobOptions::default());

    assert!(outcome.error.is_none());
    assert_eq!(outcome.status, JobStatus::PartiallySucceeded);
    assert_eq!(outcome.counters.failed_moves, 1);
    assert_eq!(outcome.counters.total_moves, 0);
    assert_consistent(&volume);
}

#[test]
fn dry_run_leaves_the_volume_alone() {
    let mut volume = fragmented_pair();
    let options = JobOptions {
        dry_run: true,
        ..Default::default()
    };
    let outcome = run(&mut volume, JobKind::Defragmentation, options);

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(outcome.counters.total_moves, 1);
    assert!(volume.moves().is_empty());
    assert_eq!(
        volume.file("C:\\a").unwrap().blockmap,
        BlockMap::from_extents(&[(10, 5), (50, 5)])
    );
}

#[test]
fn repeat_stops_once_a_run_moves_nothing() {
    let mut volume = fragmented_pair();
    let options = JobOptions {
        repeat: true,
        ..Default::default()
    };
    let outcome = run(&mut volume, JobKind::Defragmentation, options);
    assert_eq!(outcome.runs, 2);
    assert_eq!(outcome.counters.total_moves, 1);
}

#[test]
fn fragmentation_below_threshold_skips_moves() {
    let mut volume = fragmented_pair();
    let options = JobOptions {
        fragmentation_threshold: 80.0,
        ..Default::default()
    };
    let outcome = run(&mut volume, JobKind::Defragmentation, options);
    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert!(volume.moves().is_empty());
}

/// Three small files packed right behind the reserved area, in reverse
/// path order, with the rest of the volume free.
fn unsorted_volume() -> MemoryVolume {
    MemoryVolume::builder("C:", 1000, 4096)
        .reserved(0, 10)
        .file("C:\\c", &[(10, 5)])
        .file("C:\\b", &[(15, 5)])
        .file("C:\\a", &[(20, 5)])
        .build()
}

#[test]
fn full_optimization_sorts_small_files_by_path() {
    let mut volume = unsorted_volume();
    let outcome = run(&mut volume, JobKind::FullOptimization, JobOptions::default());

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(first_lcn(&volume, "C:\\a"), 10);
    assert_eq!(first_lcn(&volume, "C:\\b"), 15);
    assert_eq!(first_lcn(&volume, "C:\\c"), 20);
    assert_eq!(outcome.counters.pass_number, 1);
    assert!(volume.files().all(|f| !f.is_fragmented()));
    assert_consistent(&volume);
}

#[test]
fn quick_optimization_honours_descending_order() {
    let mut volume = unsorted_volume();
    let options = JobOptions {
        sort_order: SortOrder::Descending,
        ..Default::default()
    };
    let outcome = run(&mut volume, JobKind::QuickOptimization, options);

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(first_lcn(&volume, "C:\\c"), 10);
    assert_eq!(first_lcn(&volume, "C:\\b"), 15);
    assert_eq!(first_lcn(&volume, "C:\\a"), 20);
    assert_consistent(&volume);
}

#[test]
fn fat_directories_keep_their_first_cluster() {
    let mut volume = MemoryVolume::builder("F:", 200, 512)
        .fs_name("FAT32")
        .reserved(0, 10)
        .directory("F:\\dir", &[(10, 5), (40, 5)])
        .build();
    let outcome = run(&mut volume, JobKind::QuickOptimization, JobOptions::default());

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(
        volume.file("F:\\dir").unwrap().blockmap,
        BlockMap::from_extents(&[(10, 10)])
    );
    assert_consistent(&volume);
}

#[test]
fn mft_is_compacted_behind_its_first_block() {
    let mut volume = MemoryVolume::builder("C:", 200, 4096)
        .reserved(0, 10)
        .file("C:\\$MFT", &[(10, 10), (50, 10)])
        .file("C:\\x", &[(20, 10)])
        .build();
    let outcome = run(&mut volume, JobKind::MftOptimization, JobOptions::default());

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(
        volume.file("C:\\$MFT").unwrap().blockmap,
        BlockMap::from_extents(&[(10, 20)])
    );
    assert_eq!(
        volume.file("C:\\x").unwrap().blockmap,
        BlockMap::from_extents(&[(190, 10)])
    );
    assert_consistent(&volume);
}

#[test]
fn mft_optimization_needs_an_mft() {
    let mut volume = fragmented_pair();
    let outcome = run(&mut volume, JobKind::MftOptimization, JobOptions::default());
    assert_eq!(outcome.exit_code(), 16);
    assert_eq!(outcome.status, JobStatus::Failed);
}

#[test]
fn mft_optimization_on_fat_is_a_no_op() {
    let mut volume = MemoryVolume::builder("F:", 200, 512)
        .fs_name("FAT32")
        .file("F:\\a", &[(10, 5), (50, 5)])
        .build();
    let outcome = run(&mut volume, JobKind::MftOptimization, JobOptions::default());
    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert!(volume.moves().is_empty());
}

fn two_files() -> MemoryVolume {
    MemoryVolume::builder("C:", 100, 4096)
        .reserved(0, 10)
        .file("C:\\x", &[(60, 5)])
        .file("C:\\y", &[(80, 5)])
        .build()
}

#[test]
fn move_to_front_uses_the_first_fitting_regions() {
    let mut volume = two_files();
    let outcome = run(&mut volume, JobKind::SingleFileMoveFront, JobOptions::default());
    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(first_lcn(&volume, "C:\\x"), 10);
    assert_eq!(first_lcn(&volume, "C:\\y"), 15);
    assert_consistent(&volume);
}

#[test]
fn move_to_end_packs_against_the_last_cluster() {
    let mut volume = two_files();
    let outcome = run(&mut volume, JobKind::SingleFileMoveEnd, JobOptions::default());
    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(first_lcn(&volume, "C:\\x"), 95);
    assert_eq!(first_lcn(&volume, "C:\\y"), 90);
    assert_consistent(&volume);
}

/// Ten files of two 2-cluster fragments each; only the long gaps fit them.
fn many_fragmented() -> MemoryVolume {
    let mut b = MemoryVolume::builder("C:", 1000, 4096);
    for i in 0..10u64 {
        b = b.file(&format!("C:\\f{i}"), &[(i * 4, 2), (200 + i * 4, 2)]);
    }
    b.build()
}

#[test]
fn cancellation_stops_between_moves() {
    let mut volume = many_fragmented();
    let flag = ShutdownFlag::new();
    let trigger = flag.clone();
    let mut stop_after_three = move |p: &ProgressInfo| {
        if p.counters.total_moves >= 3 {
            trigger.request();
        }
    };
    let outcome = run_job(
        &mut volume,
        "C:",
        JobKind::Defragmentation,
        JobOptions::default(),
        &flag,
        Some(&mut stop_after_three),
    );

    assert!(outcome.cancelled);
    assert!(outcome.error.is_none());
    assert!(flag.should_terminate());
    assert_eq!(outcome.counters.total_moves, 3);
    assert_eq!(volume.files().filter(|f| !f.is_fragmented()).count(), 3);
    assert_consistent(&volume);
}

#[test]
fn immediate_cancellation_moves_nothing() {
    let mut volume = many_fragmented();
    let outcome = run_job(
        &mut volume,
        "C:",
        JobKind::FullOptimization,
        JobOptions::default(),
        &CountdownTerminator::new(0),
        None,
    );
    assert!(outcome.cancelled);
    assert!(volume.moves().is_empty());
    assert_consistent(&volume);
}

#[test]
fn every_job_keeps_the_volume_consistent() {
    for kind in [
        JobKind::Analysis,
        JobKind::Defragmentation,
        JobKind::QuickOptimization,
        JobKind::FullOptimization,
        JobKind::SingleFileMoveFront,
        JobKind::SingleFileMoveEnd,
    ] {
        let mut volume = many_fragmented();
        let outcome = run(&mut volume, kind, JobOptions::default());
        assert_ne!(outcome.status, JobStatus::Failed, "{kind} failed");
        assert_consistent(&volume);
    }
}

#[test]
fn locked_files_are_counted_once_across_repeats() {
    let mut volume = MemoryVolume::builder("C:", 200, 4096)
        .reserved(0, 10)
        .file("C:\\a", &[(10, 5), (50, 5)])
        .file("C:\\b", &[(15, 20)])
        .file("C:\\held", &[(60, 3), (70, 3)])
        .locked("C:\\held")
        .build();
    let options = JobOptions {
        repeat: true,
        ..Default::default()
    };
    let outcome = run(&mut volume, JobKind::Defragmentation, options);

    assert_eq!(outcome.runs, 2);
    assert_eq!(outcome.counters.locked_files, 1);
    assert_eq!(outcome.status, JobStatus::PartiallySucceeded);
    assert_consistent(&volume);
}

#[test]
fn target_taken_by_another_writer_is_not_a_failure() {
    // the first move into [35, 50) is refused once, as if someone got there first
    let mut volume = MemoryVolume::builder("C:", 200, 4096)
        .reserved(0, 10)
        .file("C:\\a", &[(10, 5), (50, 5)])
        .file("C:\\b", &[(15, 20)])
        .file("C:\\y", &[(60, 3), (70, 3)])
        .collision(35, 15)
        .build();
    let outcome = run(&mut volume, JobKind::Defragmentation, JobOptions::default());

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(outcome.counters.failed_moves, 0);
    assert_eq!(outcome.counters.total_moves, 2);
    assert_eq!(
        volume.file("C:\\y").unwrap().blockmap,
        BlockMap::from_extents(&[(35, 6)])
    );
    assert_eq!(
        volume.file("C:\\a").unwrap().blockmap,
        BlockMap::from_extents(&[(55, 10)])
    );
    assert_consistent(&volume);
}

/// Holes of six clusters in front, a 20-cluster file too big to sort, and an
/// eight-cluster file split over the holes that never fits in front again.
fn no_room_in_front() -> MemoryVolume {
    MemoryVolume::builder("C:", 60, 4096)
        .reserved(0, 10)
        .reserved(16, 2)
        .reserved(24, 2)
        .file("C:\\a", &[(10, 4), (18, 4)])
        .file("C:\\b", &[(46, 3)])
        .file("C:\\z", &[(26, 20)])
        .build()
}

#[test]
fn front_sweep_retries_a_homeless_file_once_then_moves_on() {
    let mut volume = no_room_in_front();
    let terminator = NeverTerminate;
    let options = JobOptions {
        // ten clusters: z is too big to sort, a and b are small
        optimizer_size_limit: 10 * 4096,
        ..Default::default()
    };
    {
        let mut ctx = JobContext::new(
            &mut volume,
            "C:",
            JobKind::FullOptimization,
            options,
            &terminator,
        );
        let outcome = ctx.run();
        assert_eq!(outcome.status, JobStatus::Succeeded);
        // first pass gives up on a, the second skips it and places b
        assert_eq!(outcome.counters.pass_number, 2);

        let a = ctx.files.find_by_path("C:\\a").unwrap();
        assert!(ctx.files[a].flags.contains(FileFlags::REGION_NOT_FOUND));
    }

    assert_eq!(first_lcn(&volume, "C:\\b"), 10);
    assert_eq!(first_lcn(&volume, "C:\\z"), 26);
    // a only ever travelled to the end of the volume
    let a_moves: Vec<_> = volume.moves().iter().filter(|m| m.path == "C:\\a").collect();
    assert_eq!(a_moves.len(), 2);
    assert!(a_moves.iter().all(|m| m.target_lcn >= 49));
    assert_consistent(&volume);
}

/// `count` five-cluster files in path order, packed behind the reserved area.
fn already_sorted(count: u64) -> MemoryVolume {
    let mut b = MemoryVolume::builder("C:", 1000, 4096).reserved(0, 10);
    for i in 0..count {
        b = b.file(&format!("C:\\f{i:02}"), &[(10 + i * 5, 5)]);
    }
    b.build()
}

#[test]
fn quick_optimization_leaves_a_sorted_run_of_ten_alone() {
    let mut volume = already_sorted(10);
    let terminator = NeverTerminate;
    {
        let mut ctx = JobContext::new(
            &mut volume,
            "C:",
            JobKind::QuickOptimization,
            JobOptions::default(),
            &terminator,
        );
        let outcome = ctx.run();
        assert_eq!(outcome.status, JobStatus::Succeeded);
        assert_eq!(outcome.counters.total_moves, 0);
        assert!(
            ctx.files
                .iter()
                .all(|(_, f)| f.flags.contains(FileFlags::MOVED_TO_FRONT))
        );
    }
    assert!(volume.moves().is_empty());
}

#[test]
fn quick_optimization_sorts_a_run_of_nine_again() {
    let mut volume = already_sorted(9);
    let outcome = run(&mut volume, JobKind::QuickOptimization, JobOptions::default());

    assert_eq!(outcome.status, JobStatus::Succeeded);
    // out to the end and back to the same places
    assert_eq!(outcome.counters.total_moves, 18);
    assert!(!volume.moves().is_empty());
    assert_eq!(first_lcn(&volume, "C:\\f00"), 10);
    assert_eq!(first_lcn(&volume, "C:\\f08"), 50);
    assert_consistent(&volume);
}
