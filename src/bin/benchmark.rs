//! Filter benchmark: prints a markdown table of construction cost, lookup
//! cost, observed false-positive rate and memory use per algorithm and key
//! count.
//!
//! ```text
//! benchmark [--num-trials N]
//! ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::hint::black_box;
use std::mem;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use xorfuse::{BinaryFuse16, BinaryFuse8, Filter, Xor16, Xor8};

const DEFAULT_TRIALS: u64 = 100_000_000;
const KEY_COUNTS: [usize; 3] = [10_000, 100_000, 1_000_000];

/// Tracks live and peak heap bytes so construction cost can be reported.
struct PeakAlloc {
    live: AtomicUsize,
    peak: AtomicUsize,
}

#[global_allocator]
static ALLOC: PeakAlloc = PeakAlloc {
    live: AtomicUsize::new(0),
    peak: AtomicUsize::new(0),
};

unsafe impl GlobalAlloc for PeakAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            let live = self.live.fetch_add(layout.size(), Ordering::Relaxed) + layout.size();
            self.peak.fetch_max(live, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.live.fetch_sub(layout.size(), Ordering::Relaxed);
        System.dealloc(ptr, layout);
    }
}

impl PeakAlloc {
    fn reset_peak(&self) {
        self.peak
            .store(self.live.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next(&mut self) -> u64 {
        let mut z = self.state.wrapping_add(0x9E3779B97F4A7C15);
        self.state = z;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }
}

fn main() -> ExitCode {
    let mut trials = DEFAULT_TRIALS;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--num-trials" => {
                let Some(n) = args.next().and_then(|v| v.parse().ok()).filter(|&n| n > 0) else {
                    return usage();
                };
                trials = n;
            }
            _ => return usage(),
        }
    }

    println!("| algorithm | keys | populate | lookup | fpp | bits/entry | peak populate bytes | filter bytes |");
    println!("|-----------|------|----------|--------|-----|------------|---------------------|--------------|");
    for keys in KEY_COUNTS {
        bench("xor8", keys, trials, |k| Xor8::try_from(k).unwrap());
        bench("xor16", keys, trials, |k| Xor16::try_from(k).unwrap());
        bench("binary-fuse8", keys, trials, |k| {
            BinaryFuse8::try_from(k).unwrap()
        });
        bench("binary-fuse16", keys, trials, |k| {
            BinaryFuse16::try_from(k).unwrap()
        });
    }
    ExitCode::SUCCESS
}

fn usage() -> ExitCode {
    eprintln!("usage: benchmark [--num-trials N]");
    ExitCode::FAILURE
}

fn bench<F, B>(name: &str, num_keys: usize, trials: u64, build: B)
where
    F: Filter<u64>,
    B: FnOnce(&[u64]) -> F,
{
    // Sequential keys; random lookup keys below then land outside the set
    // (up to a 2^-48 sliver), so every hit counts as a false positive.
    let keys: Vec<u64> = (0..num_keys as u64).collect();

    ALLOC.reset_peak();
    let populate_start = Instant::now();
    let filter = build(&keys);
    let populate = populate_start.elapsed();
    let peak_bytes = ALLOC.peak();

    let mut generator = SplitMix64::new(0xCAFEF00D ^ num_keys as u64);
    let lookup_start = Instant::now();
    let mut positives = 0u64;
    for _ in 0..trials {
        if filter.contains(black_box(&generator.next())) {
            positives += 1;
        }
    }
    let lookup = lookup_start.elapsed();

    let fpp = positives as f64 / trials as f64;
    let storage_bytes = filter.size_in_bytes() - mem::size_of::<F>();
    let bits_per_entry = storage_bytes as f64 * 8.0 / num_keys as f64;

    println!(
        "| {} | {} | {:.2?} | {:.1}ns | {:.4}% | {:.2} | {} | {} |",
        name,
        num_keys,
        populate,
        lookup.as_nanos() as f64 / trials as f64,
        fpp * 100.0,
        bits_per_entry,
        peak_bytes,
        filter.size_in_bytes(),
    );
}
