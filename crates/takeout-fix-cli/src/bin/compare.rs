/// Compare two takeout-fix output trees (e.g. a reference run and a new run)
/// Usage: takeout-compare <reference_dir> <test_dir>
///
/// Files are paired by relative path, then checked for:
/// 1. Presence on both sides
/// 2. Content (SHA-256)
/// 3. Modified time (within 1 second tolerance)
use std::path::Path;

use takeout_fix_core::compare::compare_trees;

/// Date mismatches listed before truncating
const MAX_LISTED: usize = 20;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: takeout-compare <reference_dir> <test_dir>");
        std::process::exit(2);
    }

    let ref_dir = Path::new(&args[1]);
    let test_dir = Path::new(&args[2]);
    eprintln!("Reference: {}", ref_dir.display());
    eprintln!("Test:      {}", test_dir.display());

    let cmp = compare_trees(ref_dir, test_dir)?;

    println!("=== Comparison Results ===");
    println!("Reference files: {}", cmp.reference_files);
    println!("Test files:      {}", cmp.candidate_files);
    println!();
    println!("Content matched: {}", cmp.matched);
    println!("Missing in test: {}", cmp.missing.len());
    println!("Content mismatch (same path, diff hash): {}", cmp.content_mismatch.len());
    println!("Date mismatch (>1s): {}", cmp.date_mismatch.len());
    println!("Extra in test (not in ref): {}", cmp.extra.len());

    if !cmp.missing.is_empty() {
        println!("\n--- Missing files ---");
        for f in &cmp.missing {
            println!("  {}", f);
        }
    }

    if !cmp.content_mismatch.is_empty() {
        println!("\n--- Content mismatches ---");
        for f in &cmp.content_mismatch {
            println!("  {}", f);
        }
    }

    if !cmp.date_mismatch.is_empty() {
        println!("\n--- Date mismatches (>1s) ---");
        for m in cmp.date_mismatch.iter().take(MAX_LISTED) {
            println!(
                "  {} ref mtime={} test mtime={}, diff={}s",
                m.relative,
                m.reference,
                m.candidate,
                (m.reference - m.candidate).abs()
            );
        }
        if cmp.date_mismatch.len() > MAX_LISTED {
            println!("  ... and {} more", cmp.date_mismatch.len() - MAX_LISTED);
        }
    }

    if !cmp.extra.is_empty() {
        println!("\n--- Extra in test (first {}) ---", MAX_LISTED);
        for rel in cmp.extra.iter().take(MAX_LISTED) {
            println!("  {}", rel);
        }
    }

    if cmp.is_identical() {
        println!("\nTrees are identical.");
        Ok(())
    } else {
        std::process::exit(1);
    }
}
