//! Interactive inventory selection

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;

use capv_vsphere::{InventoryKind, InventoryObject, ResourcePicker};

/// Lists the candidates on stderr and reads a number back
pub struct PromptPicker<R> {
    input: Mutex<R>,
}

impl PromptPicker<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R> PromptPicker<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: Mutex::new(input),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> ResourcePicker for PromptPicker<R> {
    async fn pick(&self, kind: InventoryKind, candidates: &[InventoryObject]) -> capv_vsphere::Result<usize> {
        eprintln!("Select a {}:", kind);
        for (i, candidate) in candidates.iter().enumerate() {
            eprintln!("  [{}] {} ({})", i + 1, candidate.name, candidate.inventory_path);
        }

        let mut input = self.input.lock().await;
        loop {
            eprint!("{} [1-{}]: ", kind, candidates.len());
            let mut line = String::new();
            let read = input.read_line(&mut line).await?;
            if read == 0 {
                return Err(capv_common::Error::validation(format!("no {} selected", kind)).into());
            }
            match line.trim().parse::<usize>() {
                Ok(choice) if (1..=candidates.len()).contains(&choice) => return Ok(choice - 1),
                _ => eprintln!("'{}' is not a valid choice", line.trim()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capv_vsphere::ManagedObjectRef;

    fn candidates() -> Vec<InventoryObject> {
        ["ds-fast", "ds-slow"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                InventoryObject::new(
                    InventoryKind::Datastore,
                    format!("/dc1/datastore/{}", name),
                    ManagedObjectRef::new("Datastore", format!("datastore-{}", i)),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn retries_until_a_valid_choice() {
        let picker = PromptPicker::new(&b"0\nfast\n2\n"[..]);
        let index = picker.pick(InventoryKind::Datastore, &candidates()).await.unwrap();
        assert_eq!(index, 1);
    }

    #[tokio::test]
    async fn end_of_input_is_an_error() {
        let picker = PromptPicker::new(&b"9\n"[..]);
        assert!(picker.pick(InventoryKind::Datastore, &candidates()).await.is_err());
    }
}
