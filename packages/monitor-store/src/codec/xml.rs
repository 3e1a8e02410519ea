//! XML record codec
//!
//! ```xml
//! <transaction id="1700000000000" timestamp="2023-11-14T22:13:20Z" status="200">
//!   <request method="GET" uri="/shop" scheme="http" protocol="HTTP/1.1" query="a=1">
//!     <header name="Host" value="localhost:8080"/>
//!     <param name="a" value="1"/>
//!     <body>...</body>
//!   </request>
//!   <server name="localhost" port="8080"/>
//!   <client address="127.0.0.1"/>
//!   <cookie name="JSESSIONID" value="abc"/>
//!   <session id="abc" replace="def">
//!     <attribute name="user" value="alice"/>
//!   </session>
//!   <dispatch kind="forward" uri="/cart.jsp" status="200">
//!     <dispatch kind="include" uri="/footer.jsp"/>
//!   </dispatch>
//! </transaction>
//! ```
//!
//! Parsing goes through `roxmltree`; writing is a straight emitter since the
//! schema is flat attributes plus one text node.

use chrono::{DateTime, SecondsFormat, Utc};
use roxmltree::Node;
use std::fmt::Write as _;

use crate::domain::{
    ClientData, DispatchKind, DispatchRecord, NameValue, RecordCodec, RequestData, ServerData,
    SessionData, TransactionRecord,
};
use crate::{Result, StoreError};

#[derive(Debug, Default, Clone, Copy)]
pub struct XmlRecordCodec;

impl RecordCodec for XmlRecordCodec {
    fn parse(&self, bytes: &[u8]) -> Result<TransactionRecord> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| StoreError::malformed("<unknown>", e).with_source(e))?;
        let document = roxmltree::Document::parse(text)?;
        parse_transaction(document.root_element())
    }

    fn write(&self, record: &TransactionRecord) -> Result<Vec<u8>> {
        let mut out = String::with_capacity(512);
        write_transaction(&mut out, record)
            .map_err(|e| StoreError::serialization(format!("XML write error: {}", e)))?;
        Ok(out.into_bytes())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Parsing
// ═══════════════════════════════════════════════════════════════════════════

fn parse_transaction(root: Node<'_, '_>) -> Result<TransactionRecord> {
    if root.tag_name().name() != "transaction" {
        return Err(StoreError::malformed(
            "<unknown>",
            format!("expected root <transaction>, found <{}>", root.tag_name().name()),
        ));
    }

    let id = required(root, "id", "<unknown>")?.to_string();
    let timestamp = DateTime::parse_from_rfc3339(required(root, "timestamp", &id)?)
        .map_err(|e| StoreError::malformed(&id, format!("bad timestamp: {}", e)))?
        .with_timezone(&Utc);
    let status = optional_u16(root, "status", &id)?;

    let request = child(root, "request")
        .ok_or_else(|| StoreError::malformed(&id, "missing <request>"))
        .and_then(|node| parse_request(node, &id))?;
    let server = child(root, "server")
        .ok_or_else(|| StoreError::malformed(&id, "missing <server>"))
        .and_then(|node| parse_server(node, &id))?;
    let client = ClientData {
        remote_address: child(root, "client")
            .and_then(|node| node.attribute("address"))
            .map(str::to_string),
    };

    let cookies = children(root, "cookie")
        .map(|node| parse_name_value(node, &id))
        .collect::<Result<Vec<_>>>()?;

    let (session, session_replacement) = match child(root, "session") {
        Some(node) => {
            let session_id = required(node, "id", &id)?;
            let session = if session_id.is_empty() {
                None
            } else {
                Some(SessionData {
                    id: session_id.to_string(),
                    attributes: children(node, "attribute")
                        .map(|attr| parse_name_value(attr, &id))
                        .collect::<Result<Vec<_>>>()?,
                })
            };
            (session, node.attribute("replace").map(str::to_string))
        }
        None => (None, None),
    };

    let dispatches = children(root, "dispatch")
        .map(|node| parse_dispatch(node, &id))
        .collect::<Result<Vec<_>>>()?;

    Ok(TransactionRecord {
        id,
        timestamp,
        request,
        server,
        client,
        cookies,
        session,
        session_replacement,
        status,
        dispatches,
    })
}

fn parse_request(node: Node<'_, '_>, id: &str) -> Result<RequestData> {
    Ok(RequestData {
        method: required(node, "method", id)?.to_string(),
        uri: required(node, "uri", id)?.to_string(),
        query: node.attribute("query").map(str::to_string),
        scheme: node.attribute("scheme").unwrap_or("http").to_string(),
        protocol: node.attribute("protocol").unwrap_or("HTTP/1.1").to_string(),
        headers: children(node, "header")
            .map(|n| parse_name_value(n, id))
            .collect::<Result<Vec<_>>>()?,
        params: children(node, "param")
            .map(|n| parse_name_value(n, id))
            .collect::<Result<Vec<_>>>()?,
        body: child(node, "body").map(|n| n.text().unwrap_or_default().to_string()),
    })
}

fn parse_server(node: Node<'_, '_>, id: &str) -> Result<ServerData> {
    let port = optional_u16(node, "port", id)?
        .ok_or_else(|| StoreError::malformed(id, "missing attribute 'port' on <server>"))?;
    Ok(ServerData {
        name: required(node, "name", id)?.to_string(),
        port,
    })
}

fn parse_dispatch(node: Node<'_, '_>, id: &str) -> Result<DispatchRecord> {
    let kind_attr = required(node, "kind", id)?;
    let kind = DispatchKind::parse(kind_attr)
        .ok_or_else(|| StoreError::malformed(id, format!("unknown dispatch kind '{}'", kind_attr)))?;
    Ok(DispatchRecord {
        kind,
        uri: required(node, "uri", id)?.to_string(),
        status: optional_u16(node, "status", id)?,
        dispatches: children(node, "dispatch")
            .map(|n| parse_dispatch(n, id))
            .collect::<Result<Vec<_>>>()?,
    })
}

fn parse_name_value(node: Node<'_, '_>, id: &str) -> Result<NameValue> {
    Ok(NameValue {
        name: required(node, "name", id)?.to_string(),
        value: node.attribute("value").unwrap_or_default().to_string(),
    })
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
}

fn children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |c| c.is_element() && c.tag_name().name() == name)
}

fn required<'a>(node: Node<'a, '_>, attr: &str, id: &str) -> Result<&'a str> {
    node.attribute(attr).ok_or_else(|| {
        StoreError::malformed(
            id,
            format!("missing attribute '{}' on <{}>", attr, node.tag_name().name()),
        )
    })
}

fn optional_u16(node: Node<'_, '_>, attr: &str, id: &str) -> Result<Option<u16>> {
    node.attribute(attr)
        .map(|raw| {
            raw.trim()
                .parse::<u16>()
                .map_err(|e| StoreError::malformed(id, format!("bad '{}' value '{}': {}", attr, raw, e)))
        })
        .transpose()
}

// ═══════════════════════════════════════════════════════════════════════════
// Writing
// ═══════════════════════════════════════════════════════════════════════════

fn write_transaction(out: &mut String, record: &TransactionRecord) -> std::fmt::Result {
    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    write!(
        out,
        r#"<transaction id="{}" timestamp="{}""#,
        escape(&record.id),
        record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    )?;
    if let Some(status) = record.status {
        write!(out, r#" status="{}""#, status)?;
    }
    writeln!(out, ">")?;

    let request = &record.request;
    write!(
        out,
        r#"  <request method="{}" uri="{}" scheme="{}" protocol="{}""#,
        escape(&request.method),
        escape(&request.uri),
        escape(&request.scheme),
        escape(&request.protocol)
    )?;
    if let Some(query) = &request.query {
        write!(out, r#" query="{}""#, escape(query))?;
    }
    writeln!(out, ">")?;
    for header in &request.headers {
        write_name_value(out, "    ", "header", header)?;
    }
    for param in &request.params {
        write_name_value(out, "    ", "param", param)?;
    }
    if let Some(body) = &request.body {
        writeln!(out, "    <body>{}</body>", escape(body))?;
    }
    writeln!(out, "  </request>")?;

    writeln!(
        out,
        r#"  <server name="{}" port="{}"/>"#,
        escape(&record.server.name),
        record.server.port
    )?;
    if let Some(address) = &record.client.remote_address {
        writeln!(out, r#"  <client address="{}"/>"#, escape(address))?;
    }
    for cookie in &record.cookies {
        write_name_value(out, "  ", "cookie", cookie)?;
    }
    if let Some(session) = &record.session {
        write!(out, r#"  <session id="{}""#, escape(&session.id))?;
        if let Some(replacement) = &record.session_replacement {
            write!(out, r#" replace="{}""#, escape(replacement))?;
        }
        writeln!(out, ">")?;
        for attribute in &session.attributes {
            write_name_value(out, "    ", "attribute", attribute)?;
        }
        writeln!(out, "  </session>")?;
    } else if let Some(replacement) = &record.session_replacement {
        // empty id marks "no captured session"
        writeln!(
            out,
            r#"  <session id="" replace="{}"></session>"#,
            escape(replacement)
        )?;
    }
    for dispatch in &record.dispatches {
        write_dispatch(out, dispatch, 1)?;
    }
    writeln!(out, "</transaction>")
}

fn write_dispatch(out: &mut String, dispatch: &DispatchRecord, depth: usize) -> std::fmt::Result {
    let indent = "  ".repeat(depth);
    write!(
        out,
        r#"{}<dispatch kind="{}" uri="{}""#,
        indent,
        dispatch.kind.as_str(),
        escape(&dispatch.uri)
    )?;
    if let Some(status) = dispatch.status {
        write!(out, r#" status="{}""#, status)?;
    }
    if dispatch.dispatches.is_empty() {
        return writeln!(out, "/>");
    }
    writeln!(out, ">")?;
    for nested in &dispatch.dispatches {
        write_dispatch(out, nested, depth + 1)?;
    }
    writeln!(out, "{}</dispatch>", indent)
}

fn write_name_value(
    out: &mut String,
    indent: &str,
    tag: &str,
    pair: &NameValue,
) -> std::fmt::Result {
    writeln!(
        out,
        r#"{}<{} name="{}" value="{}"/>"#,
        indent,
        tag,
        escape(&pair.name),
        escape(&pair.value)
    )
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            '\n' => escaped.push_str("&#10;"),
            '\r' => escaped.push_str("&#13;"),
            '\t' => escaped.push_str("&#9;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
