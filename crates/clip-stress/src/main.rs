//! Clip session stress harness
//!
//! Usage:
//!   clip-stress                              - 5s run over two scratch clips
//!   clip-stress --assets DIR --clips a,b     - use real files below DIR
//!   clip-stress --chaos 0.3 --looping        - more pause/resume and stop_all bursts
//!   RUST_LOG=debug clip-stress               - watch the reaper work
//!
//! Alternates between clips on a fixed interval, stopping the previous sound
//! before starting the next one, against the simulated engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use rand::Rng;

use clip_session::sim::{SimConfig, SimEngineFactory};
use clip_session::{ClipPlayer, DirAssetSource, Host, RegistryConfig, SessionRegistry};

#[derive(Parser)]
#[command(name = "clip-stress", about = "Clip session manager stress harness")]
struct Cli {
    /// Asset root; scratch clips are generated when omitted
    #[arg(short, long)]
    assets: Option<PathBuf>,

    /// Clips to alternate between
    #[arg(short, long, value_delimiter = ',', default_value = "click.ogg,chime.ogg")]
    clips: Vec<String>,

    /// Run time in seconds
    #[arg(short, long, default_value_t = 5)]
    duration: u64,

    /// Pause between two clip switches
    #[arg(short, long, default_value_t = 250)]
    interval_ms: u64,

    /// Start every clip looping
    #[arg(long)]
    looping: bool,

    /// Probability of a pause/resume per switch (a quarter of it for stop_all)
    #[arg(long, default_value_t = 0.1)]
    chaos: f64,

    /// Simulated clip length
    #[arg(long, default_value_t = 400)]
    clip_ms: u64,

    /// Registry config (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct Stats {
    switches: u64,
    started: u64,
    failed: u64,
    pauses: u64,
    stop_bursts: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.clips.is_empty() {
        bail!("at least one clip is required");
    }
    if !(0.0..=1.0).contains(&cli.chaos) {
        bail!("--chaos must be within 0..=1");
    }

    let config = match &cli.config {
        Some(path) => RegistryConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RegistryConfig::default(),
    };

    // Keeps generated clips alive for the whole run
    let mut scratch = None;
    let root = match &cli.assets {
        Some(dir) => dir.clone(),
        None => {
            let dir = tempfile::tempdir().context("creating scratch asset dir")?;
            for clip in &cli.clips {
                std::fs::write(dir.path().join(clip), b"OggS")
                    .with_context(|| format!("writing scratch clip {}", clip))?;
            }
            let root = dir.path().to_path_buf();
            scratch = Some(dir);
            root
        }
    };

    let factory = Arc::new(SimEngineFactory::new(SimConfig {
        clip_length_ms: cli.clip_ms,
        ..SimConfig::default()
    }));
    let host = Host::new(factory.clone());
    host.bind_asset_source(Arc::new(
        DirAssetSource::new(&root).with_context(|| format!("asset root {}", root.display()))?,
    ));
    let registry = host.on_load(config).context("loading registry")?;

    log::info!(
        "[Stress] {} clips, {}s, every {}ms (loop={})",
        cli.clips.len(),
        cli.duration,
        cli.interval_ms,
        cli.looping
    );
    let stats = run(&cli, &registry);

    // give the reaper a chance to drain what finished
    let drain_until = Instant::now() + Duration::from_secs(2);
    while !registry.is_empty() && !cli.looping && Instant::now() < drain_until {
        thread::sleep(Duration::from_millis(20));
    }

    println!("═══════════════════════════════════════════");
    println!("switches        {}", stats.switches);
    println!("started         {}", stats.started);
    println!("failed          {}", stats.failed);
    println!("pause/resume    {}", stats.pauses);
    println!("stop_all bursts {}", stats.stop_bursts);
    println!("registry size   {}", registry.len());
    if let Some(note) = registry_note(cli.looping) {
        println!("                ({})", note);
    }
    println!("reaped          {}", registry.reaped_total());
    println!("live devices    {}", factory.backend().live_devices());

    drop(registry);
    host.on_unload();
    println!("after unload    {} live devices", factory.backend().live_devices());
    println!("═══════════════════════════════════════════");

    drop(scratch);
    Ok(())
}

fn registry_note(looping: bool) -> Option<&'static str> {
    looping.then_some("looping sessions are never reaped; released on unload")
}

fn run(cli: &Cli, registry: &Arc<SessionRegistry>) -> Stats {
    let mut rng = rand::rng();
    let mut stats = Stats::default();
    let interval = Duration::from_millis(cli.interval_ms);
    let deadline = Instant::now() + Duration::from_secs(cli.duration);
    let mut current: Option<ClipPlayer> = None;

    while Instant::now() < deadline {
        let clip = &cli.clips[(stats.switches as usize) % cli.clips.len()];
        stats.switches += 1;

        if let Some(previous) = current.take() {
            previous.stop();
        }

        let player = ClipPlayer::new(Arc::clone(registry));
        let volume = rng.random_range(0.2..=1.0f32);
        if player.init(clip, volume, cli.looping) && player.play() {
            stats.started += 1;
            let pan = rng.random_range(-1.0..=1.0f32);
            player.set_params(1.0, pan, volume);
        } else {
            stats.failed += 1;
            log::warn!("[Stress] could not start {}", clip);
        }

        if rng.random_bool(cli.chaos) {
            stats.pauses += 1;
            player.pause();
            thread::sleep(interval / 4);
            player.resume();
        }
        if rng.random_bool(cli.chaos / 4.0) {
            stats.stop_bursts += 1;
            if !registry.stop_all() {
                log::warn!("[Stress] stop_all reported a failure");
            }
        }

        current = Some(player);
        thread::sleep(interval);
    }

    if let Some(last) = current {
        last.stop();
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_note_only_for_looping_runs() {
        assert!(registry_note(false).is_none());
        assert!(registry_note(true).unwrap().contains("never reaped"));
    }
}
