use serde_json::{json, Map, Value};

use crate::store::KeyValueStore;

pub const OWNED_CARDS_KEY: &str = "ringsdb_custom_owned_cards";

/// Card codes the user owns outside of the packs the site knows about.
pub struct CustomOwnedCards<S: KeyValueStore> {
    store: S,
    codes: Vec<String>,
}

impl<S: KeyValueStore> CustomOwnedCards<S> {
    /// Unreadable stored data counts as an empty list.
    pub fn load(store: S) -> Self {
        let codes = match store.get(OWNED_CARDS_KEY) {
            Ok(None) => Vec::new(),
            Ok(Some(v)) => serde_json::from_value(v).unwrap_or_else(|err| {
                log::error!("failed to parse owned cards: {err}");
                Vec::new()
            }),
            Err(err) => {
                log::error!("failed to load owned cards: {err:#}");
                Vec::new()
            }
        };
        log::debug!("loaded {} owned cards", codes.len());
        Self { store, codes }
    }

    #[must_use]
    pub fn list(&self) -> &[String] {
        &self.codes
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    pub fn add(&mut self, code: &str) -> anyhow::Result<bool> {
        if self.codes.iter().any(|c| c == code) {
            return Ok(false);
        }
        self.codes.push(code.to_string());
        self.save()?;
        Ok(true)
    }

    /// Number of codes that were new.
    pub fn add_many<I, T>(&mut self, codes: I) -> anyhow::Result<usize>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut added = 0;
        for code in codes {
            let code = code.as_ref();
            if !self.codes.iter().any(|c| c == code) {
                self.codes.push(code.to_string());
                added += 1;
            }
        }
        if added > 0 {
            self.save()?;
        }
        log::info!("added {added} owned cards");
        Ok(added)
    }

    pub fn remove(&mut self, code: &str) -> anyhow::Result<bool> {
        let Some(i) = self.codes.iter().position(|c| c == code) else {
            return Ok(false);
        };
        self.codes.remove(i);
        self.save()?;
        Ok(true)
    }

    pub fn clear(&mut self) -> anyhow::Result<usize> {
        let n = self.codes.len();
        self.codes.clear();
        self.store.remove(OWNED_CARDS_KEY)?;
        log::info!("cleared {n} owned cards");
        Ok(n)
    }

    /// Replaces the whole list, e.g. with the codes of the enabled expansions.
    pub fn apply<I, T>(&mut self, codes: I) -> anyhow::Result<usize>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.clear()?;
        self.add_many(codes)
    }

    /// [`rewrite_query`] with the current list.
    #[must_use]
    pub fn rewrite_query(&self, base: &Value) -> Value {
        rewrite_query(base, &self.codes)
    }

    fn save(&mut self) -> anyhow::Result<()> {
        self.store.set(OWNED_CARDS_KEY, json!(self.codes))
    }
}

/// Widens a card-list query so custom owned cards match regardless of pack:
/// `(pack_code in packs) or (code in custom)`.
///
/// Queries without a plain `pack_code.$in` list come back unchanged.
#[must_use]
pub fn rewrite_query(base: &Value, custom: &[String]) -> Value {
    let Some(obj) = base.as_object() else {
        return base.clone();
    };
    if obj.is_empty() || custom.is_empty() {
        return base.clone();
    }
    let Some(packs) = obj
        .get("pack_code")
        .and_then(|p| p.get("$in"))
        .and_then(Value::as_array)
    else {
        return base.clone();
    };
    if !packs.first().is_some_and(Value::is_string) {
        return base.clone();
    }

    let mut out: Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| k.as_str() != "pack_code")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    out.insert(
        "$or".to_string(),
        json!([
            { "pack_code": { "$in": packs } },
            { "code": { "$in": custom } }
        ]),
    );
    Value::Object(out)
}
