//! Parses the in-repo manifest (`.kerfuffle` by default) into the typed
//! records the rest of the daemon drives off of.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, anyhow};
use kerfuffle_client::entities::{DnsBinding, Meta, Provision, Proxy};

#[derive(Debug, Clone)]
pub struct Manifest {
  pub meta: Meta,
  pub provisions: BTreeMap<String, Provision>,
  pub proxies: BTreeMap<String, Proxy>,
  pub dns_bindings: BTreeMap<String, DnsBinding>,
}

/// Reads and parses the manifest file at `manifest_path`. Unknown top-level
/// keys are ignored; a missing `[meta]` table or a malformed sub-table fails
/// the whole parse, which in turn fails the whole install.
pub fn load(manifest_path: &Path) -> anyhow::Result<Manifest> {
  let raw = std::fs::read_to_string(manifest_path).with_context(|| {
    format!("failed to read manifest at {}", manifest_path.display())
  })?;
  let root: toml::Table = toml::from_str(&raw)
    .with_context(|| format!("malformed manifest at {}", manifest_path.display()))?;

  let meta_value = root
    .get("meta")
    .ok_or_else(|| anyhow!("manifest is missing the [meta] table"))?;
  let meta: Meta = meta_value
    .clone()
    .try_into()
    .context("malformed [meta] table")?;

  let provisions = parse_subtable::<Provision>(&root, "provision")?
    .into_iter()
    .map(|(id, mut provision)| {
      provision.id = id.clone();
      (id, provision)
    })
    .collect();
  let proxies = parse_subtable::<Proxy>(&root, "proxy")?;
  let dns_bindings = parse_subtable::<DnsBinding>(&root, "cloudflare")?;

  Ok(Manifest {
    meta,
    provisions,
    proxies,
    dns_bindings,
  })
}

fn parse_subtable<T: serde::de::DeserializeOwned>(
  root: &toml::Table,
  name: &str,
) -> anyhow::Result<BTreeMap<String, T>> {
  let Some(value) = root.get(name) else {
    return Ok(BTreeMap::new());
  };
  let table = value
    .as_table()
    .ok_or_else(|| anyhow!("[{name}] must be a table of named entries"))?;

  let mut out = BTreeMap::new();
  for (key, entry) in table {
    let parsed: T = entry
      .clone()
      .try_into()
      .with_context(|| format!("malformed [{name}.{key}]"))?;
    out.insert(key.clone(), parsed);
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write_manifest(contents: &str) -> tempfile_path::TempManifest {
    tempfile_path::TempManifest::new(contents)
  }

  mod tempfile_path {
    use std::{fs, io::Write, path::PathBuf};

    pub struct TempManifest {
      pub path: PathBuf,
    }

    impl TempManifest {
      pub fn new(contents: &str) -> Self {
        let path = std::env::temp_dir()
          .join(format!("kerfuffle-manifest-test-{}", rand::random::<u64>()));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        Self { path }
      }
    }

    impl Drop for TempManifest {
      fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
      }
    }
  }

  #[test]
  fn parses_full_manifest() {
    let manifest = write_manifest(
      r#"
      [meta]
      name = "demo"

      [provision.web]
      run = [["echo", "hi"]]
      envs = ["FOO=bar"]
      base_dir = "server"

      [proxy.web]
      host = ["svc.local"]

      [cloudflare.web]
      host = ["svc.local"]
      zone = "example.com"
      "#,
    );

    let parsed = load(&manifest.path).unwrap();
    assert_eq!(parsed.meta.name, "demo");
    let web = parsed.provisions.get("web").unwrap();
    assert_eq!(web.id, "web");
    assert_eq!(web.run, vec![vec!["echo".to_string(), "hi".to_string()]]);
    assert_eq!(web.environment_variables, vec!["FOO=bar".to_string()]);
    assert_eq!(parsed.proxies.get("web").unwrap().hosts, vec!["svc.local".to_string()]);
    assert_eq!(parsed.dns_bindings.get("web").unwrap().zone, "example.com");
  }

  #[test]
  fn missing_meta_table_fails() {
    let manifest = write_manifest("[provision.web]\nrun = [[\"echo\", \"hi\"]]\n");
    assert!(load(&manifest.path).is_err());
  }

  #[test]
  fn unknown_keys_are_ignored() {
    let manifest = write_manifest(
      r#"
      [meta]
      name = "demo"

      [something_unknown]
      value = 1
      "#,
    );
    assert!(load(&manifest.path).is_ok());
  }
}
