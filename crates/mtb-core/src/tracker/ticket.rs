use std::collections::BTreeMap;

use serde::Serialize;

use super::TrackerError;

const UTF8_BOM: &[u8] = &[0xef, 0xbb, 0xbf];

/// A Trac ticket.
///
/// Tickets come in any shape (fields depend on the Trac configuration), so this
/// is just a map of strings. The `_url` field always points at the ticket page.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Ticket(BTreeMap<String, String>);

impl Ticket {
    pub const URL_FIELD: &'static str = "_url";

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn url(&self) -> Option<&str> {
        self.get(Self::URL_FIELD)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Ticket {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Decode the `?format=csv` export of a single ticket.
///
/// Trac sends exactly one header row and one data row, sometimes behind a
/// UTF-8 BOM. Anything else is rejected.
pub fn parse_ticket_csv(body: &[u8], ticket_url: &str) -> Result<Ticket, TrackerError> {
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body);

    let records = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TrackerError::MalformedPayload(format!("CSV decoding failed: {e}")))?;

    let [header, values] = records.as_slice() else {
        return Err(TrackerError::MalformedPayload(format!(
            "expected 2 CSV rows, got {}",
            records.len()
        )));
    };

    if header.len() != values.len() {
        return Err(TrackerError::MalformedPayload(format!(
            "header has {} columns but ticket row has {}",
            header.len(),
            values.len()
        )));
    }

    let mut fields: BTreeMap<String, String> = header
        .iter()
        .zip(values.iter())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    fields.insert(Ticket::URL_FIELD.to_string(), ticket_url.to_string());

    Ok(Ticket(fields))
}
