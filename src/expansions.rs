use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::store::KeyValueStore;

pub const EXPANSIONS_KEY: &str = "ringsdb_expansions";
pub const ENABLED_KEY: &str = "ringsdb_enabled_expansions";
pub const DEFAULT_EXPANSION_NAME: &str = "新扩展";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Card {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "one")]
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<String>,
}

fn one() -> u32 {
    1
}

/// A user-defined card set. Unknown fields of imported data are kept as-is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expansion {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(default)]
    pub cards: BTreeMap<String, Card>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-card input of [`ExpansionStore::create_with_cards`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct CardInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedExpansion {
    pub id: String,
    pub card_count: usize,
}

pub struct ExpansionStore<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> ExpansionStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    pub fn list(&self) -> anyhow::Result<BTreeMap<String, Expansion>> {
        match self.store.get(EXPANSIONS_KEY)? {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(v) => serde_json::from_value(v).context("parse stored expansions"),
        }
    }

    fn save(&mut self, map: &BTreeMap<String, Expansion>) -> anyhow::Result<()> {
        let value = serde_json::to_value(map).context("serialize expansions")?;
        self.store.set(EXPANSIONS_KEY, value)
    }

    /// Merges `incoming` into the stored set; entries with the same id are replaced.
    pub fn import(&mut self, incoming: BTreeMap<String, Expansion>) -> anyhow::Result<BTreeMap<String, Expansion>> {
        let mut map = self.list()?;
        let n = incoming.len();
        map.extend(incoming);
        self.save(&map)?;
        log::info!("imported {n} expansions ({} total)", map.len());
        Ok(map)
    }

    /// Stores a new expansion and enables it.
    pub fn create_with_cards(
        &mut self,
        name: &str,
        cards: BTreeMap<String, CardInput>,
    ) -> anyhow::Result<CreatedExpansion> {
        let mut map = self.list()?;
        let now = timestamp();
        let id = generate_id(name);

        let cards: BTreeMap<String, Card> = cards
            .into_iter()
            .map(|(code, input)| {
                let card = Card {
                    name: input.name.filter(|n| !n.is_empty()).unwrap_or_else(|| code.clone()),
                    count: input.count.filter(|c| *c > 0).unwrap_or(1),
                    added: Some(now.clone()),
                    code: code.clone(),
                };
                (code, card)
            })
            .collect();
        let card_count = cards.len();

        let name = if name.trim().is_empty() {
            DEFAULT_EXPANSION_NAME.to_string()
        } else {
            name.to_string()
        };
        map.insert(
            id.clone(),
            Expansion {
                id: id.clone(),
                name,
                created: Some(now),
                modified: None,
                cards,
                extra: Map::new(),
            },
        );
        self.save(&map)?;
        log::info!("created expansion {id} with {card_count} cards");

        let mut enabled = self.enabled()?;
        if !enabled.contains(&id) {
            enabled.push(id.clone());
            self.save_enabled(&enabled)?;
        }
        Ok(CreatedExpansion { id, card_count })
    }

    pub fn rename(&mut self, id: &str, name: &str) -> anyhow::Result<()> {
        let mut map = self.list()?;
        let Some(exp) = map.get_mut(id) else {
            bail!("expansion not found: {id}");
        };
        exp.name = name.to_string();
        exp.modified = Some(timestamp());
        self.save(&map)
    }

    pub fn get(&self, id: &str) -> anyhow::Result<Expansion> {
        self.list()?
            .remove(id)
            .with_context(|| format!("expansion not found: {id}"))
    }

    /// Removes one expansion. Its id stays in the enabled list and is ignored from then on.
    pub fn delete(&mut self, id: &str) -> anyhow::Result<Expansion> {
        let mut map = self.list()?;
        let removed = map
            .remove(id)
            .with_context(|| format!("expansion not found: {id}"))?;
        self.save(&map)?;
        Ok(removed)
    }

    pub fn clear_all(&mut self) -> anyhow::Result<()> {
        self.store.remove(EXPANSIONS_KEY)
    }

    pub fn enabled(&self) -> anyhow::Result<Vec<String>> {
        match self.store.get(ENABLED_KEY)? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(v) => serde_json::from_value(v).context("parse enabled expansions"),
        }
    }

    fn save_enabled(&mut self, ids: &[String]) -> anyhow::Result<()> {
        self.store.set(ENABLED_KEY, serde_json::to_value(ids)?)
    }

    /// Returns whether the enabled list changed.
    pub fn set_enabled(&mut self, id: &str, on: bool) -> anyhow::Result<bool> {
        let mut ids = self.enabled()?;
        let pos = ids.iter().position(|x| x == id);
        let changed = match (on, pos) {
            (true, None) => {
                ids.push(id.to_string());
                true
            }
            (false, Some(i)) => {
                ids.remove(i);
                true
            }
            _ => false,
        };
        if changed {
            self.save_enabled(&ids)?;
        }
        Ok(changed)
    }

    /// Card codes of every enabled expansion that still exists, without duplicates.
    pub fn enabled_card_codes(&self) -> anyhow::Result<Vec<String>> {
        let map = self.list()?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for id in self.enabled()? {
            let Some(exp) = map.get(&id) else {
                continue;
            };
            for code in exp.cards.keys() {
                if seen.insert(code.as_str()) {
                    out.push(code.clone());
                }
            }
        }
        Ok(out)
    }

    pub fn export_json(&self) -> anyhow::Result<Option<String>> {
        let map = self.list()?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::to_string_pretty(&map)?))
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `exp_<unix millis>_<9 hex chars>`.
fn generate_id(name: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let n = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut hasher = Sha256::new();
    hasher.update(format!("{millis}:{n}:{}:{name}", std::process::id()).as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("exp_{millis}_{}", &digest[..9])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn cards(pairs: &[(&str, Option<&str>, Option<u32>)]) -> BTreeMap<String, CardInput> {
        pairs
            .iter()
            .map(|(code, name, count)| {
                (
                    code.to_string(),
                    CardInput {
                        name: name.map(str::to_string),
                        count: *count,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn create_fills_defaults_and_enables() {
        let mut store = ExpansionStore::new(MemoryStore::new());
        let created = store
            .create_with_cards("", cards(&[("01001", Some("Aragorn"), Some(3)), ("01002", None, Some(0))]))
            .expect("create");
        assert_eq!(created.card_count, 2);
        assert!(created.id.starts_with("exp_"));
        assert_eq!(created.id.rsplit('_').next().map(str::len), Some(9));

        let exp = store.get(&created.id).expect("get");
        assert_eq!(exp.name, DEFAULT_EXPANSION_NAME);
        assert!(exp.created.is_some());
        assert_eq!(exp.cards["01001"].name, "Aragorn");
        assert_eq!(exp.cards["01001"].count, 3);
        assert_eq!(exp.cards["01002"].name, "01002");
        assert_eq!(exp.cards["01002"].count, 1);
        assert_eq!(store.enabled().expect("enabled"), vec![created.id]);
    }

    #[test]
    fn ids_are_unique() {
        let mut store = ExpansionStore::new(MemoryStore::new());
        let a = store.create_with_cards("A", BTreeMap::new()).expect("a");
        let b = store.create_with_cards("A", BTreeMap::new()).expect("b");
        assert_ne!(a.id, b.id);
        assert_eq!(store.list().expect("list").len(), 2);
    }

    #[test]
    fn rename_get_delete_unknown_ids_fail() {
        let mut store = ExpansionStore::new(MemoryStore::new());
        assert!(store.rename("nope", "x").is_err());
        assert!(store.get("nope").is_err());
        assert!(store.delete("nope").is_err());

        let id = store.create_with_cards("Old", BTreeMap::new()).expect("create").id;
        store.rename(&id, "New").expect("rename");
        let exp = store.get(&id).expect("get");
        assert_eq!(exp.name, "New");
        assert!(exp.modified.is_some());

        store.delete(&id).expect("delete");
        assert!(store.list().expect("list").is_empty());
        assert_eq!(store.export_json().expect("export"), None);
    }

    #[test]
    fn import_merges_and_keeps_unknown_fields() {
        let mut store = ExpansionStore::new(MemoryStore::new());
        let first: BTreeMap<String, Expansion> = serde_json::from_value(json!({
            "exp_1": {"id": "exp_1", "name": "Core", "cards": {"01001": {"code": "01001", "name": "Aragorn", "count": 1}}},
            "exp_2": {"id": "exp_2", "name": "Dwarrowdelf", "cards": {}, "color": "red"}
        }))
        .expect("parse");
        store.import(first).expect("import");

        let second: BTreeMap<String, Expansion> = serde_json::from_value(json!({
            "exp_1": {"id": "exp_1", "name": "Core Set", "cards": {}}
        }))
        .expect("parse");
        let merged = store.import(second).expect("import");
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["exp_1"].name, "Core Set");
        assert_eq!(merged["exp_2"].extra.get("color"), Some(&json!("red")));

        let exported = store.export_json().expect("export").expect("non-empty");
        assert!(exported.contains("\"color\": \"red\""));
    }

    #[test]
    fn enabled_codes_skip_missing_and_dedupe() {
        let mut store = ExpansionStore::new(MemoryStore::new());
        let a = store
            .create_with_cards("A", cards(&[("02", None, None), ("01", None, None)]))
            .expect("a")
            .id;
        let b = store
            .create_with_cards("B", cards(&[("01", None, None), ("03", None, None)]))
            .expect("b")
            .id;
        store.set_enabled("exp_gone", true).expect("enable");
        assert_eq!(store.enabled_card_codes().expect("codes"), vec!["01", "02", "03"]);

        assert!(store.set_enabled(&a, false).expect("disable"));
        assert!(!store.set_enabled(&a, false).expect("disable again"));
        assert_eq!(store.enabled_card_codes().expect("codes"), vec!["01", "03"]);
        assert_eq!(store.enabled().expect("enabled"), vec![b, "exp_gone".to_string()]);
    }

    #[test]
    fn clear_all_leaves_enabled_list() {
        let mut store = ExpansionStore::new(MemoryStore::new());
        let id = store.create_with_cards("A", BTreeMap::new()).expect("create").id;
        store.clear_all().expect("clear");
        assert!(store.list().expect("list").is_empty());
        assert_eq!(store.enabled().expect("enabled"), vec![id]);
    }
}
