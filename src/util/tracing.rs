//! Log output setup
// (c) 2024 Ross Younger

use std::{fs::File, sync::Arc};

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, registry::Registry, EnvFilter, Layer};

/// Filter for everything; also the file filter unless [`FILE_FILTER_VAR`] is set
const FILTER_VAR: &str = "RUST_LOG";
const FILE_FILTER_VAR: &str = "RUST_LOG_FILE_DETAIL";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Where a filter came from
#[derive(Debug)]
struct Selection {
    filter: EnvFilter,
    /// Filters from the environment may admit other crates, so their targets are worth showing
    from_env: bool,
}

/// Reads a filter from `var`, or falls back to wgtune events at `level`.
///
/// A variable that is set but unparseable is an error rather than silently ignored.
fn select(var: &str, level: &str) -> anyhow::Result<Selection> {
    match std::env::var(var) {
        Ok(directives) => EnvFilter::try_new(&directives)
            .map(|filter| Selection {
                filter,
                from_env: true,
            })
            .with_context(|| format!("{var}={directives:?} is not a valid log filter")),
        Err(_) => Ok(Selection {
            filter: EnvFilter::new(format!("wgtune={level}")),
            from_env: false,
        }),
    }
}

fn stderr_layer(sel: Selection) -> BoxedLayer {
    fmt::layer()
        .compact()
        .with_target(sel.from_env)
        .with_writer(std::io::stderr)
        .with_filter(sel.filter)
        .boxed()
}

fn file_layer(file: File, sel: Selection) -> BoxedLayer {
    fmt::layer()
        .compact()
        .with_ansi(false)
        .with_target(sel.from_env)
        .with_writer(Arc::new(file))
        .with_filter(sel.filter)
        .boxed()
}

/// Installs the global subscriber: stderr always, plus `log_file` if given.
///
/// Without `RUST_LOG`, only wgtune's own events at `level` are shown.
/// The file copy follows `RUST_LOG_FILE_DETAIL` when that is set, `RUST_LOG` otherwise.
///
/// **CAUTION:** On failure nothing is installed, so the caller has to report the error itself.
pub fn setup(level: &str, log_file: Option<&str>) -> anyhow::Result<()> {
    let mut layers = vec![stderr_layer(select(FILTER_VAR, level)?)];

    if let Some(name) = log_file {
        let file = File::create(name).with_context(|| format!("creating log file {name}"))?;
        let var = if std::env::var_os(FILE_FILTER_VAR).is_some() {
            FILE_FILTER_VAR
        } else {
            FILTER_VAR
        };
        layers.push(file_layer(file, select(var, level)?));
    }

    tracing_subscriber::registry().with(layers).init();
    Ok(())
}
