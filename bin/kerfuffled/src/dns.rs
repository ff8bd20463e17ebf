//! Publishes DNS A-records for an application's hostnames against a
//! Cloudflare-compatible provider, and tears them down again on uninstall.

use std::{path::Path, time::Duration};

use anyhow::{Context, bail};
use kerfuffle_client::entities::DnsRecord;
use serde::Deserialize;
use serde_json::json;

use crate::error::KerfuffleError;

const API_BASE: &str = "https://api.cloudflare.com/client/v4";
const IP_ECHO_URL: &str = "https://v4.ident.me/";

#[derive(Debug, Deserialize)]
struct ZoneResponse {
  result: Vec<Zone>,
}

#[derive(Debug, Deserialize)]
struct Zone {
  id: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecordsResponse {
  result: Vec<RawDnsRecord>,
}

#[derive(Debug, Deserialize)]
struct DnsRecordResponse {
  success: bool,
  #[serde(default)]
  errors: Vec<serde_json::Value>,
  result: RawDnsRecord,
}

#[derive(Debug, Deserialize)]
struct RawDnsRecord {
  id: String,
  #[serde(rename = "type")]
  record_type: String,
  name: String,
  #[serde(default)]
  content: String,
  #[serde(default)]
  ttl: i64,
  #[serde(default)]
  proxied: bool,
  #[serde(default)]
  zone_id: String,
}

impl From<RawDnsRecord> for DnsRecord {
  fn from(raw: RawDnsRecord) -> Self {
    DnsRecord {
      id: raw.id,
      zone_id: raw.zone_id,
      record_type: raw.record_type,
      name: raw.name,
      content: raw.content,
      ttl: raw.ttl,
      proxied: raw.proxied,
    }
  }
}

fn client() -> reqwest::Client {
  reqwest::Client::new()
}

/// Reads the bearer token for `zone` from `<zone_dir>/<zone>`, trimmed.
pub fn read_zone_token(zone_dir: &Path, zone: &str) -> anyhow::Result<String> {
  let path = zone_dir.join(zone);
  let raw = std::fs::read_to_string(&path).map_err(|_| {
    KerfuffleError::NoTokenForZone(zone.to_string())
  })?;
  Ok(raw.trim().to_string())
}

async fn resolve_zone_id(token: &str, zone: &str) -> anyhow::Result<String> {
  let resp = client()
    .get(format!("{API_BASE}/zones"))
    .query(&[("name", zone)])
    .bearer_auth(token)
    .send()
    .await
    .context("failed to query zones")?;

  if !resp.status().is_success() {
    bail!(KerfuffleError::DnsProviderFailed(format!(
      "zone lookup returned {}",
      resp.status()
    )));
  }

  let body: ZoneResponse = resp.json().await.context("malformed zone response")?;
  let zone_record = body
    .result
    .into_iter()
    .next()
    .ok_or_else(|| KerfuffleError::DnsProviderFailed(format!("no zone records found for '{zone}'")))?;
  Ok(zone_record.id)
}

async fn clear_existing_records(
  token: &str,
  zone_id: &str,
  host: &str,
) -> anyhow::Result<()> {
  let resp = client()
    .get(format!("{API_BASE}/zones/{zone_id}/dns_records"))
    .bearer_auth(token)
    .send()
    .await
    .context("failed to list dns records")?;

  if !resp.status().is_success() {
    bail!(KerfuffleError::DnsProviderFailed(format!(
      "dns record listing returned {}",
      resp.status()
    )));
  }

  let body: DnsRecordsResponse =
    resp.json().await.context("malformed dns record listing")?;

  for record in body.result {
    if record.name != host {
      continue;
    }
    let del = client()
      .delete(format!(
        "{API_BASE}/zones/{zone_id}/dns_records/{}",
        record.id
      ))
      .bearer_auth(token)
      .send()
      .await
      .context("failed to delete pre-existing dns record")?;
    if !del.status().is_success() {
      bail!(KerfuffleError::DnsProviderFailed(format!(
        "failed to remove existing record '{}': {}",
        record.id,
        del.status()
      )));
    }
  }

  Ok(())
}

/// Resolves the caller's own public IP via an external echo service. Used
/// when a DNS binding's `content` is left empty.
pub async fn resolve_public_ip() -> anyhow::Result<String> {
  let resp = reqwest::Client::builder()
    .timeout(Duration::from_secs(15))
    .build()?
    .get(IP_ECHO_URL)
    .send()
    .await
    .context("failed to reach ip echo service")?;
  Ok(resp.text().await?.trim().to_string())
}

/// Publishes one A-record for `host` in `zone`, clearing any pre-existing
/// record with the same name first so repeated installs stay idempotent
/// (P8). `zone == "example.com"` is a documented no-op placeholder.
pub async fn publish_record(
  zone_dir: &Path,
  zone: &str,
  host: &str,
  proxied: bool,
) -> anyhow::Result<Option<DnsRecord>> {
  if zone == "example.com" {
    return Ok(None);
  }

  let token = read_zone_token(zone_dir, zone)?;
  let zone_id = resolve_zone_id(&token, zone).await?;
  clear_existing_records(&token, &zone_id, host).await?;

  let content = resolve_public_ip().await?;

  let resp = client()
    .post(format!("{API_BASE}/zones/{zone_id}/dns_records"))
    .bearer_auth(&token)
    .json(&json!({
      "type": "A",
      "name": host,
      "content": content,
      "ttl": 1,
      "proxied": proxied,
    }))
    .send()
    .await
    .context("failed to create dns record")?;

  if !resp.status().is_success() {
    bail!(KerfuffleError::DnsProviderFailed(format!(
      "record creation returned {}",
      resp.status()
    )));
  }

  let body: DnsRecordResponse =
    resp.json().await.context("malformed dns record response")?;
  if !body.success || !body.errors.is_empty() {
    bail!(KerfuffleError::DnsProviderFailed(format!(
      "provider reported errors: {:?}",
      body.errors
    )));
  }

  let mut record: DnsRecord = body.result.into();
  record.zone_id = zone_id;
  Ok(Some(record))
}

/// Removes the record last published for an app, as persisted to `.cf-dns`.
/// `zone` is the apex domain name (not the provider's internal zone id),
/// kept alongside the record by the caller so the right token file can be
/// located.
pub async fn remove_record(
  zone_dir: &Path,
  zone: &str,
  record: &DnsRecord,
) -> anyhow::Result<()> {
  if zone == "example.com" {
    return Ok(());
  }
  let token = read_zone_token(zone_dir, zone)?;
  let resp = client()
    .delete(format!(
      "{API_BASE}/zones/{}/dns_records/{}",
      record.zone_id, record.id
    ))
    .bearer_auth(&token)
    .send()
    .await
    .context("failed to delete dns record")?;
  if !resp.status().is_success() {
    bail!(KerfuffleError::DnsProviderFailed(format!(
      "record removal returned {}",
      resp.status()
    )));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reading_token_for_missing_zone_file_is_no_token_error() {
    let dir = std::env::temp_dir();
    let err = read_zone_token(&dir, "zone-that-does-not-exist.invalid").unwrap_err();
    assert!(err.downcast_ref::<KerfuffleError>().is_some());
  }
}
