use std::process::Command;

fn main() {
    // Release images are built without .git; they pass the hash in.
    let git_hash = std::env::var("TRACK_PROCESSOR_GIT_HASH")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(short_commit_hash)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={}", git_hash.trim());

    println!("cargo:rerun-if-env-changed=TRACK_PROCESSOR_GIT_HASH");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");
}

fn short_commit_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}
