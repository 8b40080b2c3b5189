//! A single model entry from one server's tags listing, and the merged
//! view across every server that advertises it.

use fleet_core::ServerId;

#[derive(Debug, Clone)]
pub struct ModelTag {
    pub name: String,
    pub digest: Option<String>,
}

impl ModelTag {
    /// The merge key: `name:digest` when a digest is present, else the
    /// bare name. Two servers advertising the same name with different
    /// digests stay distinct entries.
    pub fn merge_key(&self) -> String {
        match &self.digest {
            Some(digest) => format!("{}:{}", self.name, digest),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergedModelEntry {
    pub name: String,
    pub digest: Option<String>,
    pub server_ids: Vec<ServerId>,
}

pub(crate) fn merge(per_server: Vec<(ServerId, Vec<ModelTag>)>) -> Vec<MergedModelEntry> {
    let mut by_key: std::collections::HashMap<String, MergedModelEntry> = std::collections::HashMap::new();

    for (server_id, tags) in per_server {
        for tag in tags {
            let key = tag.merge_key();
            let entry = by_key.entry(key).or_insert_with(|| MergedModelEntry {
                name: tag.name.clone(),
                digest: tag.digest.clone(),
                server_ids: Vec::new(),
            });
            if !entry.server_ids.contains(&server_id) {
                entry.server_ids.push(server_id.clone());
            }
        }
    }

    let mut merged: Vec<MergedModelEntry> = by_key.into_values().collect();
    merged.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.digest.cmp(&b.digest)));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> ServerId {
        ServerId::new(s).unwrap()
    }

    #[test]
    fn merges_same_name_and_digest_across_servers() {
        let merged = merge(vec![
            (sid("s1"), vec![ModelTag { name: "llama3".into(), digest: Some("abc".into()) }]),
            (sid("s2"), vec![ModelTag { name: "llama3".into(), digest: Some("abc".into()) }]),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].server_ids.len(), 2);
    }

    #[test]
    fn keeps_different_digests_of_the_same_name_distinct() {
        let merged = merge(vec![
            (sid("s1"), vec![ModelTag { name: "llama3".into(), digest: Some("abc".into()) }]),
            (sid("s2"), vec![ModelTag { name: "llama3".into(), digest: Some("def".into()) }]),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn names_without_a_digest_merge_on_name_alone() {
        let merged = merge(vec![
            (sid("s1"), vec![ModelTag { name: "llama3".into(), digest: None }]),
            (sid("s2"), vec![ModelTag { name: "llama3".into(), digest: None }]),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].server_ids.len(), 2);
    }
}
