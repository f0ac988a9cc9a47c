// SPDX-License-Identifier: MIT OR Apache-2.0
//! Weft player - headless scene runner
//!
//! Loads a RON scene description, starts its engine and drives ticks
//! until every engine has wound down (or a tick cap is reached, for
//! scenes that never finish on their own).
//!
//! Usage: `weft_player [scene.ron]`. With no argument a small bundled
//! demo scene is run.

use std::path::PathBuf;
use thiserror::Error;
use weft_runtime::{LoadError, Plugin, Runtime, RuntimeEvent, SceneDescription};

/// Upper bound on ticks for scenes that stay active forever.
const MAX_TICKS: u32 = 600;

const DEMO_SCENE: &str = include_str!("../demos/hello.ron");

#[derive(Debug, Error)]
enum PlayerError {
    #[error("failed to read scene file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse scene: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("failed to load scene: {0}")]
    Load(#[from] LoadError),
}

/// Logs lifecycle notifications as they arrive.
struct ConsolePlugin;

impl Plugin for ConsolePlugin {
    fn on_graph_enter(&mut self, rt: &Runtime, graph: weft_runtime::NodeKey) {
        let alias = rt.node(graph).map(|n| n.alias.clone()).unwrap_or_default();
        tracing::info!(%alias, "graph entered");
    }

    fn on_load_progress(&mut self, _rt: &Runtime, _graph: weft_runtime::NodeKey, percentage: u32) {
        tracing::debug!(percentage, "loading");
    }

    fn on_graph_exit(
        &mut self,
        rt: &Runtime,
        graph: weft_runtime::NodeKey,
        portal: &str,
        still_active: bool,
    ) {
        let alias = rt.node(graph).map(|n| n.alias.clone()).unwrap_or_default();
        tracing::info!(%alias, portal, still_active, "graph exited");
    }
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("weft_player=info".parse().expect("static directive"))
        .add_directive("weft_runtime=info".parse().expect("static directive"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let Err(e) = run(std::env::args_os().nth(1).map(PathBuf::from)) {
        tracing::error!(error = %e, "player failed");
        std::process::exit(1);
    }
}

fn run(path: Option<PathBuf>) -> Result<(), PlayerError> {
    let text = match &path {
        Some(p) => std::fs::read_to_string(p)?,
        None => DEMO_SCENE.to_string(),
    };
    let scene: SceneDescription = ron::from_str(&text)?;

    let mut rt = Runtime::new();
    rt.register_plugin(Box::new(ConsolePlugin));

    let engine = rt.open(&scene)?;
    rt.start(engine);

    let mut tick = 0;
    while rt.engine_count() > 0 && tick < MAX_TICKS {
        tick += 1;
        rt.frame(f64::from(tick) / 60.0);
        while let Some(event) = rt.poll_event() {
            if let RuntimeEvent::EngineDisposed { engine } = event {
                tracing::info!(engine = ?engine, "engine finished");
            }
        }
    }

    if tick == MAX_TICKS {
        tracing::warn!("tick cap reached; shutting down");
        rt.shutdown();
    }
    Ok(())
}
