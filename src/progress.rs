use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::download::ProgressFn;

/// Returns the default progress function: one indicatif bar per artifact,
/// stacked in a shared [`MultiProgress`].
pub fn default_progress_fn() -> ProgressFn {
    let multi = MultiProgress::new();
    let bars: Mutex<HashMap<String, ProgressBar>> = Mutex::new(HashMap::new());
    let style = ProgressStyle::with_template(
        "{msg:>24} {bytes:>10}/{total_bytes:<10} ({bytes_per_sec}) {wide_bar}",
    )
    .expect("progress template is valid");

    Arc::new(move |src: &str, current: u64, total: u64, _mib_per_sec: f64, complete: bool| {
        let mut bars = bars.lock().expect("progress bar registry");

        if complete {
            if let Some(bar) = bars.remove(src) {
                if total > 0 {
                    bar.set_length(total);
                }
                bar.set_position(current.max(total));
                bar.finish();
            }
            return;
        }

        let bar = bars.entry(src.to_owned()).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(total.max(current)));
            bar.set_style(style.clone());
            bar.set_message(artifact_label(src));
            bar
        });
        if total > 0 {
            bar.set_length(total);
        }
        bar.set_position(current);
    })
}

/// Last two URL path components, e.g. `darwin/query-engine.gz`.
fn artifact_label(url: &str) -> String {
    let mut parts: Vec<&str> = url.rsplit('/').take(2).collect();
    parts.reverse();
    parts.join("/")
}
