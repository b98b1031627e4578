use std::collections::BTreeMap;
use std::path::Path;

use clap::ValueEnum;
use openaero_market::payment::{alipay, wechat};

use super::keygen::read_secret_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WebhookProvider {
    Alipay,
    Wechat,
}

/// Parse repeated `--param key=value` arguments. Later keys win.
pub fn parse_params(raw: &[String]) -> Result<BTreeMap<String, String>, String> {
    let mut params = BTreeMap::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("parameter '{entry}' must be key=value"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("parameter '{entry}' has an empty key"));
        }
        params.insert(key.to_string(), value.to_string());
    }
    Ok(params)
}

/// Build a signed notification body: a form body for Alipay, an XML
/// document for WeChat. Any `sign` given in `params` is replaced.
pub fn signed_body(
    provider: WebhookProvider,
    mut params: BTreeMap<String, String>,
    secret_key: Option<&Path>,
    api_key: Option<&str>,
) -> Result<String, String> {
    params.remove("sign");
    match provider {
        WebhookProvider::Alipay => {
            let path = secret_key.ok_or("alipay notifications need --key <file.secret>")?;
            let key = read_secret_key(path)?;
            params
                .entry("sign_type".to_string())
                .or_insert_with(|| "ED25519".to_string());
            let sign = alipay::sign(&params, &key);
            params.insert("sign".to_string(), sign);
            Ok(alipay::to_form(&params))
        }
        WebhookProvider::Wechat => {
            let api_key = api_key
                .filter(|k| !k.is_empty())
                .ok_or("wechat notifications need --api-key or WECHAT_API_KEY")?;
            let sign = wechat::sign(&params, api_key).map_err(|e| e.to_string())?;
            params.insert("sign".to_string(), sign);
            Ok(wechat::to_xml(&params))
        }
    }
}

/// `openaero sign-webhook`
pub fn cmd_sign_webhook(
    provider: WebhookProvider,
    raw_params: &[String],
    secret_key: Option<&Path>,
    api_key: Option<&str>,
) {
    let body = parse_params(raw_params)
        .and_then(|params| signed_body(provider, params, secret_key, api_key));
    match body {
        Ok(body) => println!("{body}"),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
