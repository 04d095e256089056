//! `sounder platform`: classify this host and print the profile.

use colored::Colorize;

use crate::platform;
use crate::transcript::Transcript;

pub fn run() -> anyhow::Result<()> {
    let mut transcript = Transcript::console_only();
    let profile = platform::detect(&mut transcript)?;

    println!("\n{}", "sounder platform".bold());
    println!("  family:    {}", profile.os_family.as_str().bold());
    println!("  name:      {}", profile.pretty_name());
    println!("  version:   {}", profile.os_version);
    println!("  kernel:    {}", platform::kernel_string());
    println!("  distro:    {}", profile.distro_id);
    if let Some(variant) = &profile.variant {
        println!("  variant:   {variant}");
    }
    println!("  packages:  {}", profile.package_manager);
    Ok(())
}
