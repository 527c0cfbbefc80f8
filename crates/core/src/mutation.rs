//! Mutation payloads
//!
//! A [`Mutation`] holds a set payload and a delete payload, each encoded
//! either as JSON or as N-Quads. The client never interprets payloads beyond
//! extracting the conflict keys they expose. The full triple view is
//! available to any cluster implementation that needs it.
//!
//! # Conflict keys
//!
//! A conflict key is `"<subject>|<predicate>"`. Subjects that are blank nodes
//! (`_:name`) have no uid yet, so they yield no client-side key. The cluster
//! reports keys for them in the response context once uids are assigned.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Encoded set or delete payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// JSON object or array of objects, subjects identified by `uid`
    Json(Vec<u8>),
    /// N-Quads text, one `<s> <p> object .` statement per line
    NQuads(String),
}

/// Object position of a triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectValue {
    /// Literal value
    Literal(String),
    /// Edge to another node (uid or blank node)
    Node(String),
    /// Every value of the predicate (delete payloads only)
    Star,
}

/// A single subject/predicate/object statement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    /// Subject uid or blank node
    pub subject: String,
    /// Predicate name
    pub predicate: String,
    /// Object value
    pub object: ObjectValue,
}

impl Triple {
    /// Conflict key for this triple, if the subject already has a uid
    pub fn conflict_key(&self) -> Option<String> {
        if is_blank_node(&self.subject) {
            None
        } else {
            Some(conflict_key(&self.subject, &self.predicate))
        }
    }
}

/// Build the conflict key for a subject/predicate pair
pub fn conflict_key(subject: &str, predicate: &str) -> String {
    format!("{}|{}", subject, predicate)
}

/// Whether a subject names a node that has no uid yet
pub fn is_blank_node(subject: &str) -> bool {
    subject.starts_with("_:")
}

/// A set of writes and deletes issued in one call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// Triples to write
    pub set: Option<Payload>,
    /// Triples to delete
    pub delete: Option<Payload>,
    /// Optional condition evaluated by the server for upserts
    pub cond: Option<String>,
    /// Commit the transaction in the same round trip
    pub commit_now: bool,
}

impl Mutation {
    /// Create an empty mutation
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutation writing a JSON-serializable value
    pub fn set_json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::new().with_set(Payload::Json(encode_json(value)?)))
    }

    /// Mutation deleting a JSON-serializable value
    pub fn delete_json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::new().with_delete(Payload::Json(encode_json(value)?)))
    }

    /// Mutation writing N-Quads
    pub fn set_nquads(nquads: impl Into<String>) -> Self {
        Self::new().with_set(Payload::NQuads(nquads.into()))
    }

    /// Mutation deleting N-Quads
    pub fn delete_nquads(nquads: impl Into<String>) -> Self {
        Self::new().with_delete(Payload::NQuads(nquads.into()))
    }

    /// Replace the set payload
    pub fn with_set(mut self, payload: Payload) -> Self {
        self.set = Some(payload);
        self
    }

    /// Replace the delete payload
    pub fn with_delete(mut self, payload: Payload) -> Self {
        self.delete = Some(payload);
        self
    }

    /// Attach an upsert condition
    pub fn with_cond(mut self, cond: impl Into<String>) -> Self {
        self.cond = Some(cond.into());
        self
    }

    /// Request commit in the same round trip
    pub fn with_commit_now(mut self, commit_now: bool) -> Self {
        self.commit_now = commit_now;
        self
    }

    /// Whether neither a set nor a delete payload is present
    pub fn is_empty(&self) -> bool {
        self.set.is_none() && self.delete.is_none()
    }

    /// Decode the set payload into triples
    pub fn set_triples(&self) -> Result<Vec<Triple>> {
        self.set.as_ref().map_or(Ok(Vec::new()), Payload::triples)
    }

    /// Decode the delete payload into triples
    pub fn delete_triples(&self) -> Result<Vec<Triple>> {
        self.delete.as_ref().map_or(Ok(Vec::new()), Payload::triples)
    }

    /// Conflict keys exposed by the payloads
    ///
    /// Malformed payloads expose no keys; the cluster rejects them anyway.
    pub fn touched_keys(&self) -> BTreeSet<String> {
        self.decodable_triples()
            .filter_map(|t| t.conflict_key())
            .collect()
    }

    /// Predicates exposed by the payloads
    pub fn touched_predicates(&self) -> BTreeSet<String> {
        self.decodable_triples().map(|t| t.predicate).collect()
    }

    fn decodable_triples(&self) -> impl Iterator<Item = Triple> {
        let set = self.set_triples().unwrap_or_default();
        let delete = self.delete_triples().unwrap_or_default();
        set.into_iter().chain(delete)
    }
}

fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| Error::invalid_request(format!("failed to encode mutation json: {}", e)))
}

impl Payload {
    /// Decode the payload into triples
    ///
    /// # Errors
    /// Returns `Error::InvalidRequest` when the payload is malformed.
    pub fn triples(&self) -> Result<Vec<Triple>> {
        match self {
            Payload::Json(bytes) => json_triples(bytes),
            Payload::NQuads(text) => nquad_triples(text),
        }
    }
}

// ============================================================================
// JSON decoding
// ============================================================================

fn json_triples(bytes: &[u8]) -> Result<Vec<Triple>> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::invalid_request(format!("invalid mutation json: {}", e)))?;

    let mut out = Vec::new();
    let mut blank_counter = 0usize;
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                json_node(item, &mut out, &mut blank_counter)?;
            }
        }
        other => {
            json_node(other, &mut out, &mut blank_counter)?;
        }
    }
    Ok(out)
}

/// Flatten one JSON object, returning its subject
fn json_node(
    value: serde_json::Value,
    out: &mut Vec<Triple>,
    blank_counter: &mut usize,
) -> Result<String> {
    let serde_json::Value::Object(map) = value else {
        return Err(Error::invalid_request(
            "mutation json must be an object or an array of objects",
        ));
    };

    let subject = match map.get("uid") {
        Some(serde_json::Value::String(uid)) => uid.clone(),
        Some(_) => return Err(Error::invalid_request("uid must be a string")),
        None => {
            *blank_counter += 1;
            format!("_:json{}", blank_counter)
        }
    };

    for (predicate, value) in map {
        if predicate == "uid" {
            continue;
        }
        match value {
            serde_json::Value::Array(items) => {
                for item in items {
                    let object = json_object(item, out, blank_counter)?;
                    out.push(Triple {
                        subject: subject.clone(),
                        predicate: predicate.clone(),
                        object,
                    });
                }
            }
            other => {
                let object = json_object(other, out, blank_counter)?;
                out.push(Triple {
                    subject: subject.clone(),
                    predicate,
                    object,
                });
            }
        }
    }
    Ok(subject)
}

fn json_object(
    value: serde_json::Value,
    out: &mut Vec<Triple>,
    blank_counter: &mut usize,
) -> Result<ObjectValue> {
    Ok(match value {
        serde_json::Value::Null => ObjectValue::Star,
        serde_json::Value::String(s) => ObjectValue::Literal(s),
        serde_json::Value::Object(_) => ObjectValue::Node(json_node(value, out, blank_counter)?),
        serde_json::Value::Array(_) => {
            return Err(Error::invalid_request("nested arrays are not supported"))
        }
        scalar => ObjectValue::Literal(scalar.to_string()),
    })
}

// ============================================================================
// N-Quads decoding
// ============================================================================

fn nquad_triples(text: &str) -> Result<Vec<Triple>> {
    let mut out = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        out.push(parse_nquad(line).map_err(|reason| {
            Error::invalid_request(format!("n-quad line {}: {}", line_no + 1, reason))
        })?);
    }
    Ok(out)
}

#[derive(Debug, PartialEq)]
enum Term {
    Node(String),
    Literal(String),
    Star,
}

fn parse_nquad(line: &str) -> std::result::Result<Triple, String> {
    let (subject, rest) = next_term(line)?;
    let (predicate, rest) = next_term(rest)?;
    let (object, mut rest) = next_term(rest)?;

    let subject = match subject {
        Term::Node(s) => s,
        _ => return Err("subject must be a uid or blank node".to_string()),
    };
    let predicate = match predicate {
        Term::Node(p) => p,
        _ => return Err("predicate must be an IRI".to_string()),
    };
    let object = match object {
        Term::Node(n) => ObjectValue::Node(n),
        Term::Literal(l) => ObjectValue::Literal(l),
        Term::Star => ObjectValue::Star,
    };

    // optional graph label before the terminator
    if !rest.trim_start().starts_with('.') {
        let (_, after_label) = next_term(rest)?;
        rest = after_label;
    }
    let rest = rest.trim_start();
    if !rest.starts_with('.') || !rest[1..].trim().is_empty() {
        return Err("statement must end with '.'".to_string());
    }

    Ok(Triple {
        subject,
        predicate,
        object,
    })
}

fn next_term(input: &str) -> std::result::Result<(Term, &str), String> {
    let input = input.trim_start();
    if let Some(rest) = input.strip_prefix('<') {
        let end = rest.find('>').ok_or("unterminated IRI")?;
        return Ok((Term::Node(rest[..end].to_string()), &rest[end + 1..]));
    }
    if input.starts_with("_:") {
        let end = input.find(char::is_whitespace).unwrap_or(input.len());
        return Ok((Term::Node(input[..end].to_string()), &input[end..]));
    }
    if let Some(rest) = input.strip_prefix('*') {
        return Ok((Term::Star, rest));
    }
    if let Some(rest) = input.strip_prefix('"') {
        let mut literal = String::new();
        let mut chars = rest.char_indices();
        while let Some((idx, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, 'n')) => literal.push('\n'),
                    Some((_, 't')) => literal.push('\t'),
                    Some((_, escaped)) => literal.push(escaped),
                    None => return Err("dangling escape in literal".to_string()),
                },
                '"' => {
                    // skip a language tag or datatype suffix
                    let after = &rest[idx + 1..];
                    let end = after.find(char::is_whitespace).unwrap_or(after.len());
                    return Ok((Term::Literal(literal), &after[end..]));
                }
                other => literal.push(other),
            }
        }
        return Err("unterminated literal".to_string());
    }
    Err(format!("unexpected term at '{}'", input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nquads_touched_keys() {
        let m = Mutation::set_nquads("<0x1> <name> \"Alice\" .\n<0x1> <age> \"30\"^^<xs:int> .");
        let keys: Vec<_> = m.touched_keys().into_iter().collect();
        assert_eq!(keys, vec!["0x1|age", "0x1|name"]);
        let preds: Vec<_> = m.touched_predicates().into_iter().collect();
        assert_eq!(preds, vec!["age", "name"]);
    }

    #[test]
    fn test_nquads_blank_node_has_no_key() {
        let m = Mutation::set_nquads("_:alice <name> \"Alice\" .");
        assert!(m.touched_keys().is_empty());
        assert_eq!(m.touched_predicates().len(), 1);
        let triples = m.set_triples().unwrap();
        assert_eq!(triples[0].subject, "_:alice");
    }

    #[test]
    fn test_nquads_literal_escapes_and_comments() {
        let m = Mutation::set_nquads("# people\n<0x2> <bio> \"says \\\"hi\\\" now\" .\n");
        let triples = m.set_triples().unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(
            triples[0].object,
            ObjectValue::Literal("says \"hi\" now".to_string())
        );
    }

    #[test]
    fn test_nquads_delete_star() {
        let m = Mutation::delete_nquads("<0x3> <friend> * .");
        let triples = m.delete_triples().unwrap();
        assert_eq!(triples[0].object, ObjectValue::Star);
        assert!(m.touched_keys().contains("0x3|friend"));
    }

    #[test]
    fn test_nquads_graph_label_is_ignored() {
        let triples = Payload::NQuads("<0x1> <name> \"A\" <graph> .".into())
            .triples()
            .unwrap();
        assert_eq!(triples.len(), 1);
    }

    #[test]
    fn test_nquads_malformed() {
        let payload = Payload::NQuads("<0x1> <name> \"Alice\"".into());
        let err = payload.triples().unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));

        let m = Mutation::set_nquads("<0x1 <name> \"x\" .");
        assert!(m.touched_keys().is_empty());
    }

    #[test]
    fn test_json_object_with_uid() {
        let m = Mutation::set_json(&json!({"uid": "0x5", "name": "Bob", "age": 41})).unwrap();
        let keys = m.touched_keys();
        assert!(keys.contains("0x5|name"));
        assert!(keys.contains("0x5|age"));
        let triples = m.set_triples().unwrap();
        assert!(triples
            .iter()
            .any(|t| t.predicate == "age" && t.object == ObjectValue::Literal("41".into())));
    }

    #[test]
    fn test_json_nested_objects_become_edges() {
        let m = Mutation::set_json(&json!({
            "uid": "0x1",
            "friend": [{"uid": "0x2", "name": "Carol"}, {"name": "Dan"}]
        }))
        .unwrap();
        let triples = m.set_triples().unwrap();
        assert!(triples
            .iter()
            .any(|t| t.subject == "0x1" && t.object == ObjectValue::Node("0x2".into())));
        assert!(triples.iter().any(|t| t.subject == "0x2" && t.predicate == "name"));
        // the uid-less friend becomes a blank node
        assert!(triples.iter().any(|t| is_blank_node(&t.subject)));
        assert!(m.touched_keys().contains("0x1|friend"));
    }

    #[test]
    fn test_json_null_means_delete_all() {
        let m = Mutation::delete_json(&json!({"uid": "0x9", "name": null})).unwrap();
        let triples = m.delete_triples().unwrap();
        assert_eq!(triples[0].object, ObjectValue::Star);
    }

    #[test]
    fn test_json_rejects_scalar_root() {
        let payload = Payload::Json(b"42".to_vec());
        assert!(payload.triples().is_err());
    }

    #[test]
    fn test_builder_flags() {
        let m = Mutation::set_nquads("<0x1> <n> \"v\" .")
            .with_cond("@if(eq(len(u), 0))")
            .with_commit_now(true);
        assert!(m.commit_now);
        assert!(m.cond.is_some());
        assert!(!m.is_empty());
        assert!(Mutation::new().is_empty());
    }
}
