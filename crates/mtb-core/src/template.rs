//! Ticket formatting with a user-supplied Jinja template.

use std::collections::BTreeMap;

use minijinja::{Environment, Value};

use crate::tracker::Ticket;

/// Renders tickets with the configured `ticket_template`.
///
/// The template sees every ticket field as a top-level variable (`{{ summary }}`,
/// `{{ _url }}`) and the whole field map as `ticket`.
pub struct TicketRenderer {
    env: Environment<'static>,
}

const TEMPLATE_NAME: &str = "ticket";

impl TicketRenderer {
    /// Compile `source` once; syntax errors surface here rather than per message.
    pub fn new(source: &str) -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template_owned(TEMPLATE_NAME, source.to_string())?;
        Ok(Self { env })
    }

    /// Render one ticket. Trailing newlines are dropped so that every ticket
    /// takes exactly its own lines in the reply.
    pub fn render(&self, ticket: &Ticket) -> Result<String, minijinja::Error> {
        let mut ctx: BTreeMap<&str, Value> = ticket
            .fields()
            .map(|(k, v)| (k, Value::from(v)))
            .collect();
        ctx.entry("ticket")
            .or_insert_with(|| Value::from_serialize(ticket));

        let out = self.env.get_template(TEMPLATE_NAME)?.render(ctx)?;
        Ok(out.trim_end_matches(['\r', '\n']).to_string())
    }
}
