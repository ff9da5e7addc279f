//! Log formatter with a node label prefix and no ANSI colors
//!
//! Both peers of a pagedsm pair frequently run on the same host, so every line
//! is prefixed with `hostname:listen_port` rather than the hostname alone.
//! The formatter also:
//! - Removes ANSI color codes for file output
//! - Shows span hierarchy with tab indentation
//! - Includes file location and line numbers

use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Event formatter with a `[hostname:port]` prefix
pub struct NodeLabelFormatter {
    label: String,
}

impl NodeLabelFormatter {
    pub fn new(listen_port: u16) -> Self {
        Self {
            label: format!("{}:{}", local_hostname(), listen_port),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

fn local_hostname() -> String {
    gethostname::gethostname()
        .to_str()
        .unwrap_or("unknown")
        .to_string()
}

impl<S, N> FormatEvent<S, N> for NodeLabelFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();

        let now = std::time::SystemTime::now();
        let datetime: chrono::DateTime<chrono::Utc> = now.into();

        write!(writer, "[{}] ", self.label)?;
        write!(writer, "{} ", datetime.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;
        write!(writer, "{:5} ", meta.level())?;

        // Thread name tells the fault loop, server loop and driver apart
        if let Some(name) = std::thread::current().name() {
            write!(writer, "({}) ", name)?;
        }

        if let Some(scope) = ctx.event_scope() {
            let spans: Vec<_> = scope.from_root().collect();

            for (depth, span) in spans.iter().enumerate() {
                writeln!(writer)?;

                for _ in 0..=depth {
                    write!(writer, "\t")?;
                }

                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<tracing_subscriber::fmt::FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{}}}", fields)?;
                    }
                }
            }

            writeln!(writer)?;

            for _ in 0..=spans.len() {
                write!(writer, "\t")?;
            }
        }

        write!(writer, "{}", meta.target())?;

        if let Some(file) = meta.file() {
            if let Some(line) = meta.line() {
                write!(writer, ":{}:{}", file, line)?;
            }
        }

        write!(writer, ": ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Initialize tracing with the node label formatter.
///
/// `RUST_LOG` takes precedence over `level` when set. Logs go to stderr so
/// they do not interleave with the console's prompts on stdout.
pub fn init_with_node_label(level: &str, listen_port: u16) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let formatter = NodeLabelFormatter::new(listen_port);
    let label = formatter.label().to_string();

    let fmt_layer = fmt::layer()
        .event_format(formatter)
        .with_writer(std::io::stderr);

    // A second init (tests, embedding) keeps the first subscriber
    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_err()
    {
        return;
    }

    tracing::info!("Logging initialized for node {}", label);
}
