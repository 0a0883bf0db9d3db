//! Choosing one inventory object out of a discovered list.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::types::{InventoryKind, InventoryObject};
use crate::{Error, Result};

/// Asks someone outside the engine (usually a person) to choose
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourcePicker: Send + Sync {
    /// Index into `candidates`
    async fn pick(&self, kind: InventoryKind, candidates: &[InventoryObject]) -> Result<usize>;
}

/// Select one object:
///
/// 1. a non-empty preset (name, path or id) must match a candidate;
/// 2. no candidates is not-found;
/// 3. a single candidate is taken as is;
/// 4. otherwise the picker decides, and without one the choice is ambiguous.
pub async fn select(
    kind: InventoryKind,
    candidates: Vec<InventoryObject>,
    preset: Option<&str>,
    picker: Option<&dyn ResourcePicker>,
) -> Result<InventoryObject> {
    if let Some(preset) = preset.map(str::trim).filter(|p| !p.is_empty()) {
        return candidates
            .into_iter()
            .find(|c| c.matches(preset))
            .ok_or_else(|| Error::not_found(kind.as_str(), preset));
    }

    match candidates.len() {
        0 => Err(Error::not_found(kind.as_str(), "*")),
        1 => {
            let only = candidates.into_iter().next().ok_or_else(|| Error::not_found(kind.as_str(), "*"))?;
            debug!(%kind, name = %only.name, "auto-selected only candidate");
            Ok(only)
        }
        count => {
            let Some(picker) = picker else {
                return Err(Error::Ambiguous {
                    kind: kind.to_string(),
                    count,
                    names: candidates.iter().map(|c| c.name.clone()).collect(),
                });
            };
            let index = picker.pick(kind, &candidates).await?;
            candidates
                .into_iter()
                .nth(index)
                .ok_or_else(|| Error::not_found(kind.as_str(), format!("choice #{}", index)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManagedObjectRef;

    fn ds(name: &str, id: &str) -> InventoryObject {
        InventoryObject::new(
            InventoryKind::Datastore,
            format!("/dc1/datastore/{}", name),
            ManagedObjectRef::new("Datastore", id),
        )
    }

    #[tokio::test]
    async fn preset_must_match() {
        let candidates = vec![ds("fast", "datastore-1"), ds("slow", "datastore-2")];

        let chosen = select(InventoryKind::Datastore, candidates.clone(), Some("datastore-2"), None)
            .await
            .unwrap();
        assert_eq!(chosen.name, "slow");

        let err = select(InventoryKind::Datastore, candidates, Some("archive"), None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn single_candidate_is_auto_selected() {
        let mut picker = MockResourcePicker::new();
        picker.expect_pick().never();

        let chosen = select(InventoryKind::Datastore, vec![ds("fast", "datastore-1")], Some(""), Some(&picker))
            .await
            .unwrap();
        assert_eq!(chosen.name, "fast");
    }

    #[tokio::test]
    async fn empty_list_is_not_found() {
        let err = select(InventoryKind::Network, vec![], None, None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn multiple_candidates_ask_the_picker() {
        let mut picker = MockResourcePicker::new();
        picker
            .expect_pick()
            .withf(|kind, candidates| *kind == InventoryKind::Datastore && candidates.len() == 2)
            .times(1)
            .returning(|_, _| Ok(1));

        let chosen = select(
            InventoryKind::Datastore,
            vec![ds("fast", "datastore-1"), ds("slow", "datastore-2")],
            None,
            Some(&picker),
        )
        .await
        .unwrap();
        assert_eq!(chosen.name, "slow");
    }

    #[tokio::test]
    async fn multiple_candidates_without_picker_are_ambiguous() {
        let err = select(
            InventoryKind::Datastore,
            vec![ds("fast", "datastore-1"), ds("slow", "datastore-2")],
            None,
            None,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("fast, slow"));
    }
}
