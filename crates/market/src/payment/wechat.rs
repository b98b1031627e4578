//! WeChat Pay notifications: flat XML documents signed with HMAC-SHA256.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use openaero_storage::PaymentProvider;
use rust_decimal::Decimal;
use sha2::Sha256;

use super::signature::canonical_query;
use super::{Notice, NoticeStatus, WebhookError};

type HmacSha256 = Hmac<Sha256>;

fn malformed(msg: impl Into<String>) -> WebhookError {
    WebhookError::Malformed(msg.into())
}

fn check_name(name: &str) -> Result<(), WebhookError> {
    if !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        Ok(())
    } else {
        Err(malformed(format!("invalid element name '{name}'")))
    }
}

/// A repeated element would make the signed and the acted-on value ambiguous.
fn insert_field(
    fields: &mut BTreeMap<String, String>,
    name: &str,
    value: String,
) -> Result<(), WebhookError> {
    if fields.insert(name.to_string(), value).is_some() {
        return Err(malformed(format!("duplicate element <{name}>")));
    }
    Ok(())
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Parse a notification document: an `<xml>` root holding one level of
/// elements whose text is plain (entity-escaped) or CDATA.
pub fn parse_xml(body: &str) -> Result<BTreeMap<String, String>, WebhookError> {
    let mut doc = body.trim();
    if let Some(decl) = doc.strip_prefix("<?xml") {
        let end = decl
            .find("?>")
            .ok_or_else(|| malformed("unterminated XML declaration"))?;
        doc = decl[end + 2..].trim_start();
    }
    let inner = doc
        .strip_prefix("<xml>")
        .and_then(|rest| rest.strip_suffix("</xml>"))
        .ok_or_else(|| malformed("expected an <xml> root element"))?;

    let mut fields = BTreeMap::new();
    let mut rest = inner.trim_start();
    while !rest.is_empty() {
        let after_lt = rest
            .strip_prefix('<')
            .ok_or_else(|| malformed("text outside of an element"))?;
        let gt = after_lt
            .find('>')
            .ok_or_else(|| malformed("unterminated tag"))?;
        let tag = &after_lt[..gt];
        let after_open = &after_lt[gt + 1..];

        if let Some(name) = tag.strip_suffix('/') {
            let name = name.trim_end();
            check_name(name)?;
            insert_field(&mut fields, name, String::new())?;
            rest = after_open.trim_start();
            continue;
        }
        check_name(tag)?;

        let (value, tail) = match after_open.strip_prefix("<![CDATA[") {
            Some(cdata) => {
                let end = cdata
                    .find("]]>")
                    .ok_or_else(|| malformed(format!("unterminated CDATA in <{tag}>")))?;
                (cdata[..end].to_string(), cdata[end + 3..].trim_start())
            }
            None => {
                let lt = after_open
                    .find('<')
                    .ok_or_else(|| malformed(format!("unterminated element <{tag}>")))?;
                (unescape(&after_open[..lt]), &after_open[lt..])
            }
        };
        let close = format!("</{tag}>");
        rest = tail
            .strip_prefix(close.as_str())
            .ok_or_else(|| malformed(format!("expected {close}")))?
            .trim_start();
        insert_field(&mut fields, tag, value)?;
    }
    Ok(fields)
}

/// Render parameters as a notification document, every value in CDATA.
pub fn to_xml(params: &BTreeMap<String, String>) -> String {
    let mut out = String::from("<xml>");
    for (key, value) in params {
        let value = value.replace("]]>", "]]]]><![CDATA[>");
        out.push_str(&format!("<{key}><![CDATA[{value}]]></{key}>"));
    }
    out.push_str("</xml>");
    out
}

/// The response envelope WeChat expects for every delivery.
pub fn reply(return_code: &str, return_msg: &str) -> String {
    let mut params = BTreeMap::new();
    params.insert("return_code".to_string(), return_code.to_string());
    params.insert("return_msg".to_string(), return_msg.to_string());
    to_xml(&params)
}

fn keyed_mac(params: &BTreeMap<String, String>, api_key: &str) -> Result<HmacSha256, WebhookError> {
    let content = format!("{}&key={api_key}", canonical_query(params, &["sign"]));
    let mut mac = HmacSha256::new_from_slice(api_key.as_bytes())
        .map_err(|e| WebhookError::NotConfigured(format!("WeChat API key: {e}")))?;
    mac.update(content.as_bytes());
    Ok(mac)
}

/// Uppercase hex HMAC-SHA256 over the canonical string with `&key=` appended.
pub fn sign(params: &BTreeMap<String, String>, api_key: &str) -> Result<String, WebhookError> {
    let mac = keyed_mac(params, api_key)?;
    Ok(hex::encode_upper(mac.finalize().into_bytes()))
}

pub fn verify(params: &BTreeMap<String, String>, api_key: &str) -> bool {
    let Some(expected) = params.get("sign").and_then(|s| hex::decode(s.trim()).ok()) else {
        return false;
    };
    match keyed_mac(params, api_key) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

fn field<'a>(params: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    params.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

pub(crate) fn to_notice(
    params: &BTreeMap<String, String>,
    signature_valid: bool,
) -> Result<Notice, WebhookError> {
    match field(params, "return_code") {
        Some("SUCCESS") => {}
        Some(code) => {
            let msg = field(params, "return_msg").unwrap_or("no message");
            return Err(malformed(format!("return_code {code}: {msg}")));
        }
        None => return Err(malformed("missing return_code")),
    }
    let external_id = field(params, "out_trade_no").ok_or_else(|| malformed("missing out_trade_no"))?;
    let raw_fee = field(params, "total_fee").ok_or_else(|| malformed("missing total_fee"))?;
    let fen: i64 = raw_fee
        .trim()
        .parse()
        .ok()
        .filter(|f| *f >= 0)
        .ok_or_else(|| malformed(format!("invalid total_fee '{raw_fee}'")))?;
    let status = match field(params, "result_code") {
        Some("SUCCESS") => NoticeStatus::Paid,
        Some("FAIL") => NoticeStatus::Closed,
        Some(other) => return Err(malformed(format!("unknown result_code {other}"))),
        None => return Err(malformed("missing result_code")),
    };
    Ok(Notice {
        provider: PaymentProvider::Wechat,
        external_id: external_id.to_string(),
        provider_trade_no: field(params, "transaction_id").map(str::to_string),
        // total_fee is in fen.
        amount: Decimal::new(fen, 2),
        status,
        signature_valid,
    })
}
