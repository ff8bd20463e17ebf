use serde::{Deserialize, Serialize};

/// An intent to publish A-records for a set of hostnames against a DNS
/// provider zone. Parsed out of the manifest's `cloudflare.*` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsBinding {
  #[serde(default, rename = "host")]
  pub hosts: Vec<String>,
  #[serde(default)]
  pub zone: String,
  #[serde(default)]
  pub proxied: bool,
}

/// The record last published for one host, persisted to `.cf-dns` next to
/// the application's clone so Uninstall can find what to delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRecord {
  pub id: String,
  pub zone_id: String,
  #[serde(rename = "type")]
  pub record_type: String,
  pub name: String,
  pub content: String,
  pub ttl: i64,
  pub proxied: bool,
}
