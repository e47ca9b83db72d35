//! Logging conventions for this crate.
//!
//! Every backend logs through `tracing` at a level matching severity:
//! `trace!`/`debug!` for routine operations, `warn!` for recoverable
//! conditions (a best-effort lock-release failure), `error!` for surfaced
//! failures. A library must not install a global subscriber itself — that
//! decision belongs to the embedding application's `main`. This module
//! carries only a formatter a host *may* reuse; the integration test suite
//! installs it via `tests/common`'s own initializer.
//!
//! `ConditionalLocationFormatter` shows file:line only for `ERROR`/`WARN`
//! events, keeping routine `debug!`/`trace!` output free of location noise
//! while preserving it where it is most useful for debugging:
//!
//! ```text
//! ERROR kvmq::backend::rdbms: src/backend/rdbms.rs:210: transaction rolled back
//! WARN  kvmq::backend::lockfile: src/backend/lockfile.rs:77: failed to release filesystem lock
//! DEBUG kvmq::backend::memory: pushed into memory backend
//! ```

use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Shows file:line only for `ERROR`/`WARN` events; other levels print the
/// span scope and fields without location noise. Exported so an embedding
/// application can opt into the same format this crate's own test suite
/// uses, but never installed automatically.
pub struct ConditionalLocationFormatter;

impl<S, N> FormatEvent<S, N> for ConditionalLocationFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let level = metadata.level();

        write!(&mut writer, "{}", level)?;

        if matches!(level, &Level::ERROR | &Level::WARN) {
            write!(&mut writer, " {}", metadata.target())?;
            if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
                write!(&mut writer, " {}:{}", file, line)?;
            }
        }

        write!(&mut writer, ": ")?;

        if let Some(scope) = ctx.event_scope() {
            let mut first = true;
            for span in scope.from_root() {
                if !first {
                    write!(&mut writer, ":")?;
                }
                first = false;
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<tracing_subscriber::fmt::FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{}}}", fields)?;
                    }
                }
            }
            write!(writer, " ")?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}
