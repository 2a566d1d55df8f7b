use coderun_sandbox::container::ContainerRuntime;
use coderun_sandbox::SandboxConfig;
use std::process::Command;

use crate::server::load_config;

pub async fn run() -> anyhow::Result<()> {
    println!("🏥 Coderun Doctor\n");

    let config = load_config()?;
    let mut all_ok = true;

    all_ok &= check_interpreter(&config.sandbox);
    check_container_runtime(&config.sandbox).await;
    check_remote(&config.sandbox);

    println!();
    if all_ok {
        println!("✅ All checks passed! Ready to run Coderun.");
    } else {
        println!("⚠️  Some checks failed. Please fix the issues above.");
        std::process::exit(1);
    }

    Ok(())
}

fn check_interpreter(sandbox: &SandboxConfig) -> bool {
    let interpreter = &sandbox.execution.interpreter;
    print!("Checking interpreter ({})... ", interpreter);

    match Command::new(interpreter).arg("--version").output() {
        Ok(output) => {
            // python2 prints its version on stderr
            let mut version = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if version.is_empty() {
                version = String::from_utf8_lossy(&output.stderr).trim().to_string();
            }
            println!("✅ {}", version);
            true
        }
        Err(_) => {
            if sandbox.remote_endpoint().is_some() {
                println!("⚠️  not found (not needed in proxy mode)");
                true
            } else {
                println!("❌ not found on PATH");
                false
            }
        }
    }
}

async fn check_container_runtime(sandbox: &SandboxConfig) {
    print!("Checking container runtime... ");

    let runtime = ContainerRuntime::detect().await;
    if runtime.is_available() {
        println!("✅ {} (image {})", runtime.display_name(), sandbox.container.image);
    } else {
        println!("⚠️  {}; sessions fall back to a local PTY", runtime.display_name());
    }
}

fn check_remote(sandbox: &SandboxConfig) {
    print!("Checking execution service... ");

    match sandbox.remote_endpoint() {
        Some(base) => println!("✅ proxy mode via {}", base),
        None => println!("✅ local execution (backend {:?})", sandbox.backend),
    }
}
