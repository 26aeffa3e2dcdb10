//! Progress reporting driven by run notifications.
//!
//! A spinner subscribed to the notification hub: each compilation start
//! updates the message, each end or failure bumps the counter. The bar
//! draws to stderr, so it coexists with the summary tables on stdout.

use indicatif::{ProgressBar, ProgressStyle};

use stanza_core::{Event, EventKind, NotificationHub};

pub struct Progress {
    bar: ProgressBar,
}

impl Progress {
    /// Attach a spinner to the hub for the duration of a run.
    pub fn attach(hub: &NotificationHub) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());

        let on_start = bar.clone();
        hub.subscribe(EventKind::CompilationStarted, move |event| {
            if let Event::CompilationStarted { rep } = event {
                on_start.set_message(format!("compiling {rep}"));
                on_start.tick();
            }
        });
        let on_end = bar.clone();
        hub.subscribe(EventKind::CompilationEnded, move |_| {
            on_end.inc(1);
        });
        let on_fail = bar.clone();
        hub.subscribe(EventKind::CompilationFailed, move |event| {
            if let Event::CompilationFailed { rep, .. } = event {
                on_fail.inc(1);
                on_fail.println(format!("failed: {rep}"));
            }
        });

        Self { bar }
    }

    pub fn finish(self) {
        self.bar.finish_and_clear();
    }
}

fn spinner_style() -> ProgressStyle {
    match ProgressStyle::with_template("{spinner} {pos} compiled {msg}") {
        Ok(style) => style,
        Err(_) => ProgressStyle::default_spinner(),
    }
}
