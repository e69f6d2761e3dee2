//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `benchlab_core` linkage.
//! - Open a throwaway in-memory store and migrate every built-in store.
//! - Keep output deterministic for quick local sanity checks.

use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("benchlab_cli error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("benchlab_core version={}", benchlab_core::core_version());

    let mut host = benchlab_core::StoreHost::open_in_memory()?;
    for definition in benchlab_core::builtin_stores() {
        host.register_store(definition)?;
    }

    let mut stores: Vec<(String, u32)> = host
        .store_definitions()
        .map(|definition| (definition.store_name.clone(), definition.latest_version()))
        .collect();
    stores.sort();
    for (store, version) in stores {
        println!("store={store} version={version}");
    }
    Ok(())
}
