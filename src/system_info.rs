use serde::Serialize;
use sysinfo::System;

use crate::config::Config;
use crate::probe;

#[derive(Serialize, Debug)]
pub struct SystemInfo {
    pub version: String,
    pub platform: String,
    pub arch: String,
    pub cpus: usize,
    pub cpu_model: String,
    pub memory_total_gb: f64,
    pub memory_free_gb: f64,
    pub ffprobe: String,
}

pub fn get_system_info() -> SystemInfo {
    let mut system = System::new();
    system.refresh_all();

    let gb = |bytes: u64| bytes as f64 / 1024.0 / 1024.0 / 1024.0;

    let cpu_model = system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    SystemInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cpus: system.cpus().len(),
        cpu_model,
        memory_total_gb: gb(system.total_memory()),
        memory_free_gb: gb(system.free_memory()),
        ffprobe: probe::ffprobe_version().unwrap_or_else(|| "not available".to_string()),
    }
}

pub fn print_startup_info(config: &Config) {
    println!("{}", "=".repeat(60));
    println!("🚀 VidTube Backend Starting...");
    println!("{}", "=".repeat(60));

    let sys_info = get_system_info();
    println!("📊 System Information:");
    println!("  Version: {}", sys_info.version);
    println!("  Platform: {} ({})", sys_info.platform, sys_info.arch);
    println!("  CPUs: {} ({})", sys_info.cpus, sys_info.cpu_model);
    println!(
        "  Memory: {:.2} GB total, {:.2} GB free",
        sys_info.memory_total_gb, sys_info.memory_free_gb
    );
    println!("  ffprobe: {}", sys_info.ffprobe);
    println!("  Storage: {}", config.storage.backend.as_str());
    println!("  Upload Dir: {:?}", config.upload_dir);
    println!("{}", "=".repeat(60));
}
