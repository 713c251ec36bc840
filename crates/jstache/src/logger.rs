// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line format shared by the console and the optional log file.
//!
//! ```text
//! 2024-03-02T10:15:00.123Z JSTACHE | INFO | Listening on 0.0.0.0:5050
//! 2024-03-02T10:15:01.004Z JSTACHE | ERROR | connection{peer=10.0.0.7:40123}: Failed to forward document, dropping it: ...
//! ```
//!
//! ```rust,ignore
//! use tracing_subscriber::FmtSubscriber;
//! use jstache::logger::Formatter;
//!
//! let subscriber = FmtSubscriber::builder()
//!     .event_format(Formatter)
//!     .with_max_level(tracing::Level::INFO)
//!     .finish();
//!
//! tracing::subscriber::set_global_default(subscriber)?;
//! ```

use std::fmt;

use chrono::Utc;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

use crate::envelope::format_timestamp;

pub const LOG_PREFIX: &str = "JSTACHE";

/// Prefixes every line with a UTC timestamp, [`LOG_PREFIX`] and the level, followed by
/// the active spans (root first) and the event's message and fields.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(
            &mut writer,
            "{} {} | {} | ",
            format_timestamp(Utc::now()),
            LOG_PREFIX,
            metadata.level()
        )?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                // Populated by the fmt layer in `new_span`.
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::{info, info_span, warn};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_lines_carry_prefix_level_and_spans() {
        let capture = Capture::default();
        // Field styling is decided by the builder's format, so ANSI goes off first.
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .event_format(Formatter)
            .with_writer(capture.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            info!("Listening on {}", "0.0.0.0:5050");
            let span = info_span!("connection", peer = "10.0.0.7:40123");
            let _guard = span.enter();
            warn!(lines = 3, "Read error");
        });

        let output = capture.contents();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let (_, first) = lines[0].split_once(' ').unwrap();
        assert_eq!(first, "JSTACHE | INFO | Listening on 0.0.0.0:5050");

        let (_, second) = lines[1].split_once(' ').unwrap();
        assert_eq!(
            second,
            "JSTACHE | WARN | connection{peer=\"10.0.0.7:40123\"}: Read error lines=3"
        );
    }
}
