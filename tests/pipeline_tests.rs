use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use symsweep::error::FatalError;
use symsweep::pipeline::{
    Delivery, Discovery, EndpointOutcome, ExclusionRules, Extraction, MachOClassifier, PipelineTuning, RunControl,
    RunStats, WorkerPool, artifact_name, mangle, run_discovery, run_pipeline,
};
use symsweep::utils::config::{AUTH_ENDPOINTS, StageWorkers};
use symsweep::{Credential, RootSource, RunMode, ScanTarget, WorkItem, run_with};

mod common;
use common::*;

const APPKIT: &str = "System/Library/Frameworks/AppKit.framework/Versions/C/AppKit";

// --- worker pool ---

#[test]
fn test_pool_processes_every_item() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let pool = WorkerPool::start("test", 4, 2, move |n: usize| sink.lock().unwrap().push(n)).unwrap();
    for n in 0..100 {
        assert!(pool.submit(n));
    }
    pool.await_drain().unwrap();
    let mut got = seen.lock().unwrap().clone();
    got.sort();
    assert_eq!(got, (0..100).collect::<Vec<_>>());
}

#[test]
fn test_pool_rejects_after_close() {
    let mut pool = WorkerPool::start("test", 1, 1, |_: u8| {}).unwrap();
    pool.close_input();
    assert!(!pool.submit(1));
    assert!(pool.sender().is_none());
    pool.await_drain().unwrap();
}

#[test]
fn test_pool_waits_for_outside_senders() {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let pool = WorkerPool::start("test", 2, 4, move |_: u32| {
        c.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    let tx = pool.sender().unwrap();
    let producer = std::thread::spawn(move || {
        for i in 0..50 {
            tx.send(i).unwrap();
        }
    });
    producer.join().unwrap();
    pool.await_drain().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 50);
}

#[test]
fn test_pool_panic_is_fatal() {
    let pool = WorkerPool::start("boom", 1, 1, |n: u8| {
        if n == 3 {
            panic!("worker blew up");
        }
    })
    .unwrap();
    for n in 0..3 {
        pool.submit(n);
    }
    let _ = pool.submit(3);
    assert!(matches!(pool.await_drain(), Err(FatalError::WorkerPanicked(name)) if name == "boom"));
}

// --- extraction ---

#[test]
fn test_failed_dump_leaves_no_artifact() {
    let dest = tempfile::tempdir().unwrap();
    let bad = PathBuf::from("/usr/lib/libbad.dylib");
    let dumper = Arc::new(FakeDumper {
        fail_on: vec![bad.clone()],
        ..FakeDumper::default()
    });
    let control = RunControl::new();
    let extraction = Extraction::new(dest.path(), false, dumper.clone(), Arc::clone(&control));
    let (tx, rx) = crossbeam_channel::unbounded();

    extraction.handle(
        WorkItem {
            path: bad,
            arch: "x86_64".to_string(),
        },
        Some(&tx),
    );
    assert!(rx.try_recv().is_err());
    assert!(file_names(dest.path()).is_empty());
    assert_eq!(RunStats::get(&control.stats.dump_failed), 1);
    assert_eq!(RunStats::get(&control.stats.dumped), 0);
    assert!(control.take_fatal().is_none());
}

#[test]
fn test_successful_dump_is_forwarded() {
    let dest = tempfile::tempdir().unwrap();
    let control = RunControl::new();
    let extraction = Extraction::new(dest.path(), true, Arc::new(FakeDumper::default()), Arc::clone(&control));
    let (tx, rx) = crossbeam_channel::unbounded();
    extraction.handle(
        WorkItem {
            path: PathBuf::from("/usr/lib/dyld"),
            arch: "arm64e".to_string(),
        },
        Some(&tx),
    );
    let artifact = rx.try_recv().unwrap();
    assert_eq!(artifact, dest.path().join("arm64e").join("uldyld_arm64e.sym"));
    let text = std::fs::read_to_string(&artifact).unwrap();
    assert!(text.starts_with("MODULE mac arm64e"));
}

#[test]
fn test_closed_delivery_keeps_the_artifact() {
    let dest = tempfile::tempdir().unwrap();
    let control = RunControl::new();
    let extraction = Extraction::new(dest.path(), false, Arc::new(FakeDumper::default()), Arc::clone(&control));
    let (tx, rx) = crossbeam_channel::unbounded();
    drop(rx);
    extraction.handle(
        WorkItem {
            path: PathBuf::from("/usr/lib/dyld"),
            arch: "x86_64".to_string(),
        },
        Some(&tx),
    );
    assert_eq!(file_names(dest.path()), vec!["uldyld_x86_64.sym".to_string()]);
    assert_eq!(RunStats::get(&control.stats.dumped), 1);
    assert!(control.take_fatal().is_none());
}

#[test]
fn test_stopped_run_skips_extraction() {
    let dest = tempfile::tempdir().unwrap();
    let dumper = Arc::new(FakeDumper::default());
    let control = RunControl::new();
    control.cancel();
    let extraction = Extraction::new(dest.path(), false, dumper.clone(), Arc::clone(&control));
    extraction.handle(
        WorkItem {
            path: PathBuf::from("/usr/lib/dyld"),
            arch: "x86_64".to_string(),
        },
        None,
    );
    assert_eq!(dumper.calls.load(Ordering::SeqCst), 0);
}

// --- delivery ---

fn delivery(uploader: Arc<FakeUploader>, credential: Option<Credential>) -> (Delivery, Arc<RunControl>) {
    let control = RunControl::new();
    let d = Delivery::new(endpoints(), credential, uploader, no_delay(3), Arc::clone(&control));
    (d, control)
}

#[test]
fn test_failing_upload_retries_every_endpoint() {
    let up = Arc::new(FakeUploader::always(1));
    let (d, control) = delivery(up.clone(), None);
    let outcomes = d.deliver(&PathBuf::from("/tmp/a.sym"));
    assert_eq!(outcomes, vec![EndpointOutcome::Failed, EndpointOutcome::Failed]);
    let eps = endpoints();
    assert_eq!(up.attempts_to(&eps[0]), 3);
    assert_eq!(up.attempts_to(&eps[1]), 3);
    assert_eq!(RunStats::get(&control.stats.upload_failed), 2);
}

#[test]
fn test_already_present_with_credential_is_not_retried() {
    let eps = endpoints();
    let up = Arc::new(FakeUploader::with_script(0, &[(eps[0].as_str(), &[2][..])]));
    let (d, control) = delivery(up.clone(), Some(Credential::new("k")));
    let outcomes = d.deliver(&PathBuf::from("/tmp/a.sym"));
    assert_eq!(outcomes, vec![EndpointOutcome::AlreadyPresent, EndpointOutcome::Uploaded]);
    assert_eq!(up.attempts_to(&eps[0]), 1);
    assert_eq!(up.attempts_to(&eps[1]), 1);
    assert_eq!(RunStats::get(&control.stats.already_present), 1);
    assert!(up.attempts.lock().unwrap().iter().all(|(_, _, authed)| *authed));
}

#[test]
fn test_exit_two_without_credential_is_a_failure() {
    let eps = endpoints();
    let up = Arc::new(FakeUploader::with_script(0, &[(eps[0].as_str(), &[2, 2][..])]));
    let (d, _control) = delivery(up.clone(), None);
    let outcomes = d.deliver(&PathBuf::from("/tmp/a.sym"));
    assert_eq!(outcomes, vec![EndpointOutcome::Uploaded, EndpointOutcome::Uploaded]);
    assert_eq!(up.attempts_to(&eps[0]), 3);
}

#[test]
fn test_authenticated_delivery_tries_staging_first() {
    let control = RunControl::new();
    let endpoints: Vec<String> = AUTH_ENDPOINTS.iter().map(|s| s.to_string()).collect();
    let up = Arc::new(FakeUploader::always(1));
    let d = Delivery::new(
        endpoints,
        Some(Credential::new("k")),
        up.clone(),
        no_delay(3),
        Arc::clone(&control),
    );
    d.deliver(&PathBuf::from("/tmp/a.sym"));
    let order: Vec<String> = up.attempts.lock().unwrap().iter().map(|(_, e, _)| e.clone()).collect();
    assert_eq!(order.len(), 6);
    assert!(order[..3].iter().all(|e| e.starts_with("https://staging-")));
    assert!(order[3..].iter().all(|e| e.starts_with("https://prod-")));
}

#[test]
fn test_upload_succeeds_on_second_attempt() {
    let eps = endpoints();
    let up = Arc::new(FakeUploader::with_script(0, &[(eps[1].as_str(), &[1][..])]));
    let (d, control) = delivery(up.clone(), None);
    assert_eq!(d.deliver_to(&PathBuf::from("/tmp/a.sym"), &eps[1]), EndpointOutcome::Uploaded);
    assert_eq!(up.attempts_to(&eps[1]), 2);
    assert_eq!(RunStats::get(&control.stats.uploaded), 1);
    assert_eq!(RunStats::get(&control.stats.upload_failed), 0);
}

// --- discovery ---

#[test]
fn test_missing_required_target_during_walk_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let missing = root.path().join("usr/lib");
    let targets = vec![ScanTarget {
        path: missing.clone(),
        required: true,
    }];
    let tuning = PipelineTuning {
        workers: StageWorkers {
            classify: 2,
            dump: 1,
            upload: 1,
        },
        path_cap: 8,
        item_cap: 8,
        artifact_cap: 8,
    };
    let control = RunControl::new();
    let (tx, rx) = crossbeam_channel::unbounded();
    run_discovery(
        &targets,
        &ExclusionRules::with_defaults(&[]).unwrap(),
        Discovery::new(Arc::new(MachOClassifier), None),
        tx,
        &tuning,
        false,
        &control,
    )
    .unwrap();
    assert!(rx.try_recv().is_err());
    assert!(control.is_stopped());
    assert!(matches!(control.take_fatal(), Some(FatalError::MissingScanTarget(p)) if p == missing));
}

#[test]
fn test_overlapping_roots_dump_each_image_once() {
    let (root, _image) = appkit_root();
    write_file(&root.path().join("usr/lib/libz.dylib"), &thin_image(CPU_X86_64, 3, MH_DYLIB));
    let dest = tempfile::tempdir().unwrap();
    let dumper = Arc::new(FakeDumper::default());
    let control = RunControl::new();
    let opts = opts(
        RunMode::DumpOnly(RootSource::Dir(root.path().to_path_buf())),
        Some(dest.path().to_path_buf()),
    );
    let same_root_twice = vec![root.path().to_path_buf(), root.path().join(".")];
    run_pipeline(
        &same_root_twice,
        dest.path(),
        &opts,
        &stages(dumper.clone(), Arc::new(FakeUploader::always(0))),
        &control,
    )
    .unwrap();
    // AppKit has two slices, libz one.
    assert_eq!(dumper.calls.load(Ordering::SeqCst), 3);
    assert_eq!(file_names(dest.path()).len(), 3);
}

// --- end to end ---

fn appkit_root() -> (tempfile::TempDir, PathBuf) {
    let root = tempfile::tempdir().unwrap();
    make_root(root.path());
    let image = root.path().join(APPKIT);
    write_file(&image, &fat_x86_dylib());
    (root, image)
}

#[test]
fn test_full_run_dumps_and_uploads_each_slice() {
    let (root, image) = appkit_root();
    #[cfg(unix)]
    std::os::unix::fs::symlink(&image, root.path().join("usr/lib/AppKitLink")).unwrap();
    write_file(&root.path().join("usr/lib/readme.txt"), b"not an image");

    let dest = tempfile::tempdir().unwrap();
    let dumper = Arc::new(FakeDumper::default());
    let uploader = Arc::new(FakeUploader::always(0));
    let opts = opts(
        RunMode::Full(RootSource::Dir(root.path().to_path_buf())),
        Some(dest.path().to_path_buf()),
    );
    run_with(&opts, &stages(dumper.clone(), uploader.clone())).unwrap();

    let m = mangle(&image);
    let mut expected = vec![artifact_name(&m, "i386", 0), artifact_name(&m, "x86_64", 0)];
    expected.sort();
    assert_eq!(file_names(dest.path()), expected);
    assert_eq!(dumper.calls.load(Ordering::SeqCst), 2);
    assert_eq!(uploader.total_attempts(), 4);
    for ep in endpoints() {
        assert_eq!(uploader.attempts_to(&ep), 2);
    }
}

#[test]
fn test_arch_filter_limits_artifacts() {
    let (root, image) = appkit_root();
    let dest = tempfile::tempdir().unwrap();
    let uploader = Arc::new(FakeUploader::always(0));
    let mut opts = opts(
        RunMode::Full(RootSource::Dir(root.path().to_path_buf())),
        Some(dest.path().to_path_buf()),
    );
    opts.arch = Some("x86_64".to_string());
    run_with(&opts, &stages(Arc::new(FakeDumper::default()), uploader.clone())).unwrap();
    assert_eq!(file_names(dest.path()), vec![artifact_name(&mangle(&image), "x86_64", 0)]);
    assert_eq!(uploader.total_attempts(), 2);
}

#[test]
fn test_default_exclusions_are_not_dumped() {
    let root = tempfile::tempdir().unwrap();
    make_root(root.path());
    write_file(
        &root.path().join("usr/lib/libobjc.A_debug.dylib"),
        &thin_image(CPU_X86_64, 3, MH_DYLIB),
    );
    let dumper = Arc::new(FakeDumper::default());
    let dest = tempfile::tempdir().unwrap();
    let opts = opts(
        RunMode::DumpOnly(RootSource::Dir(root.path().to_path_buf())),
        Some(dest.path().to_path_buf()),
    );
    run_with(&opts, &stages(dumper.clone(), Arc::new(FakeUploader::always(0)))).unwrap();
    assert_eq!(dumper.calls.load(Ordering::SeqCst), 0);
    assert!(file_names(dest.path()).is_empty());
}

#[test]
fn test_separate_arch_subdirectories() {
    let (root, image) = appkit_root();
    let dest = tempfile::tempdir().unwrap();
    let mut opts = opts(
        RunMode::DumpOnly(RootSource::Dir(root.path().to_path_buf())),
        Some(dest.path().to_path_buf()),
    );
    opts.separate_arch = true;
    run_with(&opts, &stages(Arc::new(FakeDumper::default()), Arc::new(FakeUploader::always(0)))).unwrap();
    let m = mangle(&image);
    assert_eq!(file_names(&dest.path().join("x86_64")), vec![artifact_name(&m, "x86_64", 0)]);
    assert_eq!(file_names(&dest.path().join("i386")), vec![artifact_name(&m, "i386", 0)]);
    assert!(file_names(dest.path()).is_empty());
}

#[test]
fn test_dump_only_uploads_nothing() {
    let (root, _image) = appkit_root();
    let dest = tempfile::tempdir().unwrap();
    let uploader = Arc::new(FakeUploader::always(0));
    let opts = opts(
        RunMode::DumpOnly(RootSource::Dir(root.path().to_path_buf())),
        Some(dest.path().to_path_buf()),
    );
    run_with(&opts, &stages(Arc::new(FakeDumper::default()), uploader.clone())).unwrap();
    assert_eq!(file_names(dest.path()).len(), 2);
    assert_eq!(uploader.total_attempts(), 0);
}

#[test]
fn test_dump_only_without_destination_is_rejected() {
    let (root, _image) = appkit_root();
    let dumper = Arc::new(FakeDumper::default());
    let opts = opts(RunMode::DumpOnly(RootSource::Dir(root.path().to_path_buf())), None);
    let err = run_with(&opts, &stages(dumper.clone(), Arc::new(FakeUploader::always(0)))).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FatalError>(),
        Some(FatalError::DumpOnlyWithoutDestination)
    ));
    assert_eq!(dumper.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_upload_only_sends_top_level_files() {
    let syms = tempfile::tempdir().unwrap();
    write_file(&syms.path().join("a_x86_64.sym"), b"MODULE");
    write_file(&syms.path().join("b_i386.sym"), b"MODULE");
    write_file(&syms.path().join("x86_64/c_x86_64.sym"), b"MODULE");
    let uploader = Arc::new(FakeUploader::always(0));
    let dumper = Arc::new(FakeDumper::default());
    let opts = opts(RunMode::UploadOnly(syms.path().to_path_buf()), None);
    run_with(&opts, &stages(dumper.clone(), uploader.clone())).unwrap();
    assert_eq!(uploader.total_attempts(), 4);
    assert_eq!(dumper.calls.load(Ordering::SeqCst), 0);
    let mut sent: Vec<PathBuf> = uploader.attempts.lock().unwrap().iter().map(|(p, _, _)| p.clone()).collect();
    sent.sort();
    sent.dedup();
    assert_eq!(
        sent,
        vec![syms.path().join("a_x86_64.sym"), syms.path().join("b_i386.sym")]
    );
}

#[test]
fn test_upload_failures_do_not_fail_the_run() {
    let (root, _image) = appkit_root();
    let dest = tempfile::tempdir().unwrap();
    let uploader = Arc::new(FakeUploader::always(1));
    let opts = opts(
        RunMode::Full(RootSource::Dir(root.path().to_path_buf())),
        Some(dest.path().to_path_buf()),
    );
    run_with(&opts, &stages(Arc::new(FakeDumper::default()), uploader.clone())).unwrap();
    // 2 artifacts x 2 endpoints x 3 attempts
    assert_eq!(uploader.total_attempts(), 12);
}

#[test]
fn test_optional_targets_may_be_absent() {
    let (root, _image) = appkit_root();
    assert!(!root.path().join("System/Library/Components").exists());
    let opts = opts(RunMode::DumpOnly(RootSource::Dir(root.path().to_path_buf())), None);
    let dest = tempfile::tempdir().unwrap();
    let opts = symsweep::Opts {
        dump_to: Some(dest.path().to_path_buf()),
        ..opts
    };
    run_with(&opts, &stages(Arc::new(FakeDumper::default()), Arc::new(FakeUploader::always(0)))).unwrap();
    assert_eq!(file_names(dest.path()).len(), 2);
}

#[test]
fn test_missing_required_target_fails_before_dumping() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("System/Library/Frameworks")).unwrap();
    let dumper = Arc::new(FakeDumper::default());
    let dest = tempfile::tempdir().unwrap();
    let opts = opts(
        RunMode::DumpOnly(RootSource::Dir(root.path().to_path_buf())),
        Some(dest.path().to_path_buf()),
    );
    let err = run_with(&opts, &stages(dumper.clone(), Arc::new(FakeUploader::always(0)))).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FatalError>(),
        Some(FatalError::MissingScanTarget(_))
    ));
    assert_eq!(dumper.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_exhausted_names_abort_the_run() {
    let root = tempfile::tempdir().unwrap();
    make_root(root.path());
    let image = root.path().join("usr/lib/dyld");
    write_file(&image, &thin_image(CPU_X86_64, 3, 0x7));
    let dest = tempfile::tempdir().unwrap();
    let m = mangle(&image);
    for attempt in 0..=10 {
        write_file(&dest.path().join(artifact_name(&m, "x86_64", attempt)), b"old");
    }
    let dumper = Arc::new(FakeDumper::default());
    let opts = opts(
        RunMode::DumpOnly(RootSource::Dir(root.path().to_path_buf())),
        Some(dest.path().to_path_buf()),
    );
    let err = run_with(&opts, &stages(dumper.clone(), Arc::new(FakeUploader::always(0)))).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FatalError>(),
        Some(FatalError::NamingExhausted { .. })
    ));
    assert_eq!(dumper.calls.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read(dest.path().join(artifact_name(&m, "x86_64", 0))).unwrap(), b"old");
}
