//! Audit events raised while applying a rule set.

use std::fmt;

/// Something worth reporting about a patch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    /// A method body was replaced; `rule` is the rule whose body was kept.
    Patched { method: String, rule: String },
    /// No method in the module matched any rule.
    NoMatches,
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patched { method, rule } => write!(f, "patched {method} ({rule})"),
            Self::NoMatches => f.write_str("no methods matched any rule"),
        }
    }
}

/// Receiver of audit events.
pub trait AuditSink {
    /// Receive one event. Events arrive in the order the rule set produced them.
    fn record(&mut self, event: &AuditEvent);
}

impl<F> AuditSink for F
where
    F: FnMut(&AuditEvent),
{
    fn record(&mut self, event: &AuditEvent) {
        self(event);
    }
}

/// Forwards events to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl AuditSink for LogSink {
    fn record(&mut self, event: &AuditEvent) {
        match event {
            AuditEvent::Patched { .. } => log::info!("{event}"),
            AuditEvent::NoMatches => log::warn!("{event}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_sink_collects() {
        let mut seen = Vec::new();
        {
            let mut sink = |event: &AuditEvent| seen.push(event.clone());
            sink.record(&AuditEvent::NoMatches);
            LogSink.record(&AuditEvent::NoMatches);
        }
        assert_eq!(seen, [AuditEvent::NoMatches]);
    }

    #[test]
    fn test_display() {
        let event = AuditEvent::Patched {
            method: "Foo::Bar(x)".to_string(),
            rule: "Bar -> true".to_string(),
        };
        assert_eq!(event.to_string(), "patched Foo::Bar(x) (Bar -> true)");
    }
}
