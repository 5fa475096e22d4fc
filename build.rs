//! Build script for chainrot
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! shown by `chainrot --version`.

fn main() {
    // Re-run build if the packager overrides the engine binaries
    println!("cargo:rerun-if-env-changed=CHAINROT_SYSTEM_IPTABLES_PATH");
    println!("cargo:rerun-if-env-changed=CHAINROT_SYSTEM_IP6TABLES_PATH");

    // Embed git commit, build time, and dirty status
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
