//! Process-local LockStore with scriptable faults.
//!
//! Clones share the same state, so several lock handles built on clones of
//! one store behave like several processes talking to one replicated store.

use crate::error::StoreError;
use crate::infrastructure::{LockStore, validate_identifier};
use crate::types::{ConditionalDelete, ConditionalInsert, LockRow};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

/// Store operations a [`Fault`] can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Namespace and table creation
    Schema,
    Insert,
    Delete,
}

/// A failure to inject into the next matching operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Report a write timeout. With `applied` the mutation still lands.
    Timeout { applied: bool },
    /// Fail with [`StoreError::Unavailable`].
    Unavailable(String),
}

#[derive(Debug, Default)]
struct Namespace {
    replication: String,
    // name -> owner; None until the table has been created
    table: Option<HashMap<String, String>>,
}

#[derive(Debug, Default)]
struct Catalog {
    namespaces: BTreeMap<String, Namespace>,
    faults: VecDeque<(Operation, Fault)>,
}

impl Catalog {
    fn take_fault(&mut self, operation: Operation) -> Option<Fault> {
        let index = self.faults.iter().position(|(op, _)| *op == operation)?;
        self.faults.remove(index).map(|(_, fault)| fault)
    }

    fn table_mut(&mut self, namespace: &str) -> Result<&mut HashMap<String, String>, StoreError> {
        self.namespaces
            .get_mut(namespace)
            .and_then(|ns| ns.table.as_mut())
            .ok_or_else(|| StoreError::MissingTable(namespace.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryLockStore {
    catalog: Arc<Mutex<Catalog>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `fault` for the next `operation`. Faults fire in FIFO order.
    pub fn inject(&self, operation: Operation, fault: Fault) {
        self.catalog.lock().faults.push_back((operation, fault));
    }

    /// Number of faults not yet consumed.
    pub fn pending_faults(&self) -> usize {
        self.catalog.lock().faults.len()
    }

    /// Namespaces with their replication policy strings.
    pub fn namespaces(&self) -> Vec<(String, String)> {
        self.catalog
            .lock()
            .namespaces
            .iter()
            .map(|(name, ns)| (name.clone(), ns.replication.clone()))
            .collect()
    }

    pub fn has_table(&self, namespace: &str) -> bool {
        self.catalog
            .lock()
            .namespaces
            .get(namespace)
            .is_some_and(|ns| ns.table.is_some())
    }

    /// All rows in `namespace`, sorted by name.
    pub fn rows(&self, namespace: &str) -> Vec<LockRow> {
        let catalog = self.catalog.lock();
        let mut rows: Vec<LockRow> = catalog
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.table.as_ref())
            .map(|table| {
                table
                    .iter()
                    .map(|(name, owner)| LockRow::new(name.clone(), owner.clone()))
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }
}

fn fault_error(fault: &Fault, operation: Operation) -> StoreError {
    match fault {
        Fault::Timeout { .. } => {
            StoreError::WriteTimeout(format!("injected timeout on {:?}", operation))
        }
        Fault::Unavailable(msg) => StoreError::Unavailable(msg.clone()),
    }
}

impl LockStore for InMemoryLockStore {
    fn namespace_exists(&self, namespace: &str) -> Result<bool, StoreError> {
        Ok(self.catalog.lock().namespaces.contains_key(namespace))
    }

    fn create_namespace(&mut self, namespace: &str, replication: &str) -> Result<(), StoreError> {
        validate_identifier(namespace)?;
        let mut catalog = self.catalog.lock();
        if let Some(fault) = catalog.take_fault(Operation::Schema) {
            return Err(fault_error(&fault, Operation::Schema));
        }

        catalog
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Namespace {
                replication: replication.to_string(),
                table: None,
            });
        Ok(())
    }

    fn create_table(&mut self, namespace: &str) -> Result<(), StoreError> {
        let mut catalog = self.catalog.lock();
        if let Some(fault) = catalog.take_fault(Operation::Schema) {
            return Err(fault_error(&fault, Operation::Schema));
        }

        let ns = catalog
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| StoreError::Unavailable(format!("namespace '{}' does not exist", namespace)))?;
        ns.table.get_or_insert_with(HashMap::new);
        Ok(())
    }

    fn prepare(&mut self, namespace: &str) -> Result<(), StoreError> {
        self.catalog.lock().table_mut(namespace).map(|_| ())
    }

    fn insert_if_absent(
        &mut self,
        namespace: &str,
        row: &LockRow,
    ) -> Result<ConditionalInsert, StoreError> {
        let mut catalog = self.catalog.lock();
        let fault = catalog.take_fault(Operation::Insert);
        if let Some(Fault::Unavailable(msg)) = &fault {
            return Err(StoreError::Unavailable(msg.clone()));
        }

        let table = catalog.table_mut(namespace)?;
        let land = !matches!(fault, Some(Fault::Timeout { applied: false }));
        let outcome = match table.get(&row.name) {
            Some(owner) => ConditionalInsert::Rejected {
                owner: owner.clone(),
            },
            None => {
                if land {
                    table.insert(row.name.clone(), row.owner.clone());
                }
                ConditionalInsert::Applied
            }
        };

        match fault {
            Some(fault) => Err(fault_error(&fault, Operation::Insert)),
            None => Ok(outcome),
        }
    }

    fn delete_if_owner(
        &mut self,
        namespace: &str,
        name: &str,
        owner: &str,
    ) -> Result<ConditionalDelete, StoreError> {
        let mut catalog = self.catalog.lock();
        let fault = catalog.take_fault(Operation::Delete);
        if let Some(Fault::Unavailable(msg)) = &fault {
            return Err(StoreError::Unavailable(msg.clone()));
        }

        let table = catalog.table_mut(namespace)?;
        let land = !matches!(fault, Some(Fault::Timeout { applied: false }));
        let outcome = match table.get(name) {
            Some(current) if current == owner => {
                if land {
                    table.remove(name);
                }
                ConditionalDelete::Applied
            }
            current => ConditionalDelete::Rejected {
                owner: current.cloned(),
            },
        };

        match fault {
            Some(fault) => Err(fault_error(&fault, Operation::Delete)),
            None => Ok(outcome),
        }
    }

    fn current_owner(&self, namespace: &str, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.catalog.lock().table_mut(namespace)?.get(name).cloned())
    }
}
