//! Shared fixtures: fake dumper/uploader, Mach-O byte builders, opts and root layouts.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use symsweep::error::DumpError;
use symsweep::pipeline::{Dump, MachOClassifier, Stages, Upload};
use symsweep::utils::config::StageWorkers;
use symsweep::{Credential, Opts, RetryPolicy, RunMode, ToolOutput};

pub const CPU_X86: u32 = 7;
pub const CPU_X86_64: u32 = 0x0100_0007;
pub const CPU_ARM64: u32 = 0x0100_000c;
pub const MH_EXECUTE: u32 = 0x2;
pub const MH_DYLIB: u32 = 0x6;
pub const MH_BUNDLE: u32 = 0x8;

/// 64-bit little-endian thin Mach-O header (32 bytes).
pub fn thin_image(cpu_type: u32, cpu_subtype: u32, filetype: u32) -> Vec<u8> {
    let mut v = Vec::new();
    for word in [0xfeed_facf_u32, cpu_type, cpu_subtype, filetype, 0, 0, 0, 0] {
        v.extend_from_slice(&word.to_le_bytes());
    }
    v
}

/// Fat container with one thin header per `(cputype, cpusubtype, filetype)` at 4 KiB offsets.
pub fn fat_image(slices: &[(u32, u32, u32)]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&0xcafe_babe_u32.to_be_bytes());
    v.extend_from_slice(&(slices.len() as u32).to_be_bytes());
    let offset_of = |i: usize| 4096 * (i as u32 + 1);
    for (i, (cpu, sub, _)) in slices.iter().enumerate() {
        for word in [*cpu, *sub, offset_of(i), 32, 12] {
            v.extend_from_slice(&word.to_be_bytes());
        }
    }
    for (i, (cpu, sub, ft)) in slices.iter().enumerate() {
        v.resize(offset_of(i) as usize, 0);
        v.extend_from_slice(&thin_image(*cpu, *sub, *ft));
    }
    v
}

/// Universal x86_64 + i386 dylib.
pub fn fat_x86_dylib() -> Vec<u8> {
    fat_image(&[(CPU_X86_64, 3, MH_DYLIB), (CPU_X86, 3, MH_DYLIB)])
}

pub fn write_file(path: &Path, bytes: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

/// Root with the three required scan targets present and empty.
pub fn make_root(root: &Path) {
    for p in ["System/Library/Frameworks", "System/Library/PrivateFrameworks", "usr/lib"] {
        std::fs::create_dir_all(root.join(p)).unwrap();
    }
}

/// Writes a fake symbol record, or fails for images listed in `fail_on`.
#[derive(Default)]
pub struct FakeDumper {
    pub fail_on: Vec<PathBuf>,
    pub calls: AtomicUsize,
}

impl Dump for FakeDumper {
    fn dump(&self, arch: &str, image: &Path, mut out: File) -> Result<(), DumpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.iter().any(|p| p == image) {
            out.write_all(b"partial").unwrap();
            return Err(DumpError::Failed {
                code: Some(1),
                stderr: "bad image".to_string(),
            });
        }
        writeln!(out, "MODULE mac {} 000000 {}", arch, image.display())?;
        Ok(())
    }
}

/// Records every attempt. Exit codes come from a per-endpoint script, then `default_code`.
pub struct FakeUploader {
    pub attempts: Mutex<Vec<(PathBuf, String, bool)>>,
    pub scripted: Mutex<HashMap<String, VecDeque<i32>>>,
    pub default_code: i32,
}

impl FakeUploader {
    pub fn always(code: i32) -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            scripted: Mutex::new(HashMap::new()),
            default_code: code,
        }
    }

    pub fn with_script(default_code: i32, script: &[(&str, &[i32])]) -> Self {
        let up = Self::always(default_code);
        {
            let mut s = up.scripted.lock().unwrap();
            for (endpoint, codes) in script {
                s.insert(endpoint.to_string(), codes.iter().copied().collect());
            }
        }
        up
    }

    pub fn attempts_to(&self, endpoint: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e, _)| e == endpoint)
            .count()
    }

    pub fn total_attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

impl Upload for FakeUploader {
    fn upload(&self, artifact: &Path, endpoint: &str, credential: Option<&Credential>) -> io::Result<ToolOutput> {
        self.attempts
            .lock()
            .unwrap()
            .push((artifact.to_path_buf(), endpoint.to_string(), credential.is_some()));
        let code = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(endpoint)
            .and_then(|q| q.pop_front())
            .unwrap_or(self.default_code);
        Ok(ToolOutput {
            code: Some(code),
            output: String::new(),
        })
    }
}

pub fn stages(dumper: Arc<FakeDumper>, uploader: Arc<FakeUploader>) -> Stages {
    Stages {
        classifier: Arc::new(MachOClassifier),
        dumper,
        uploader,
    }
}

pub fn no_delay(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        delay: Duration::ZERO,
    }
}

pub fn endpoints() -> Vec<String> {
    vec!["https://a.example/upload".to_string(), "https://b.example/upload".to_string()]
}

pub fn opts(mode: RunMode, dump_to: Option<PathBuf>) -> Opts {
    Opts {
        mode,
        dump_to,
        tools_dir: None,
        arch: None,
        separate_arch: false,
        credential: None,
        endpoints: endpoints(),
        exclude: Vec::new(),
        strict: false,
        verbose: false,
        progress: false,
        workers: StageWorkers {
            classify: 4,
            dump: 3,
            upload: 2,
        },
        retry: no_delay(3),
    }
}

/// File names in `dir` (non-recursive), sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().unwrap().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
