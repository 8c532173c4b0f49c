// SPDX-License-Identifier: GPL-3.0-only

use std::{path::PathBuf, process, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use calloop::{ping::make_ping, EventLoop};
use clap_lex::RawArgs;
use tracing::{error, info};

use crate::backend::headless::HeadlessDevice;
use crate::shell::StubShell;
use crate::utils::event::{EventQueue, LoopScheduler};
use crate::utils::geometry::Rectangle;
use crate::wayland::protocols::AllowAll;

pub mod backend;
pub mod capture;
pub mod config;
pub mod eom;
mod logger;
pub mod shell;
pub mod state;
pub mod utils;
pub mod video;
pub mod viewport;
pub mod wayland;

fn main() {
    if let Err(err) = main_inner() {
        error!("Error occured in main(): {}", err);
        process::exit(1);
    }
}

fn main_inner() -> Result<()> {
    let raw_args = RawArgs::from_args();
    let mut cursor = raw_args.cursor();
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let mut config_path: Option<PathBuf> = None;

    while let Some(arg) = raw_args.next_os(&mut cursor) {
        match arg.to_str() {
            Some("--help") | Some("-h") => {
                print_help(env!("CARGO_PKG_VERSION"), git_hash);
                return Ok(());
            }
            Some("--version") | Some("-V") => {
                println!(
                    "ember-comp {} (git commit {})",
                    env!("CARGO_PKG_VERSION"),
                    git_hash
                );
                return Ok(());
            }
            Some("--config") | Some("-c") => {
                config_path = raw_args.next_os(&mut cursor).map(PathBuf::from);
            }
            _ => {}
        }
    }

    // setup logger
    logger::init_logger()?;
    info!("Starting up display-management module");

    profiling::register_thread!("Main Thread");

    let config = config::Config::load(config_path);

    // init event loop
    let mut event_loop: EventLoop<'static, state::State> =
        EventLoop::try_new().with_context(|| "Failed to initialize event loop")?;

    // hardware completions wake the loop through a ping
    let hw_events = EventQueue::new();
    let (ping, ping_source) = make_ping().with_context(|| "Failed to create ping source")?;
    hw_events.set_ping(ping);
    event_loop
        .handle()
        .insert_source(ping_source, |_, _, _| {})
        .map_err(|insert_error| insert_error.error)
        .with_context(|| "Failed to register ping source")?;

    let device = Arc::new(HeadlessDevice::new(hw_events.sender()));
    let shell = Arc::new(StubShell::new(Rectangle::new(0, 0, 720, 1280)));
    let scheduler = Arc::new(LoopScheduler::new(event_loop.handle()));

    let mut state = state::State::new(
        config,
        device,
        shell,
        Arc::new(AllowAll),
        scheduler,
        hw_events,
        event_loop.handle(),
        event_loop.get_signal(),
    );

    // run the event loop
    event_loop.run(Some(Duration::from_millis(100)), &mut state, |state| {
        state.dispatch_hw_events();

        if state.common.should_stop {
            info!("Shutting down");
            state.shutdown();
            state.common.event_loop_signal.stop();
            state.common.event_loop_signal.wakeup();
        }
    })?;

    state.shutdown();
    std::mem::drop(event_loop);

    Ok(())
}

fn print_help(version: &str, git_rev: &str) {
    println!(
        r#"ember-comp {version} (git commit {git_rev})

Display-output and video-plane management for embedded Wayland compositors.

Options:
  -h, --help        Show this message
  -V, --version     Show the version
  -c, --config      Path to a config.ron"#
    );
}
