use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use invrecon_core::{Aggregate, AggregateRoot, DomainError, PartnerId, ProjectId, WarehouseId};
use invrecon_events::Event;

/// Kind of warehouse. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarehouseType {
    /// Holds goods; takes part in quantity-bearing movements.
    Physical,
    /// Expense allocation target; only receives expense movements.
    CostCenter,
}

impl WarehouseType {
    pub fn as_str(self) -> &'static str {
        match self {
            WarehouseType::Physical => "PHYSICAL",
            WarehouseType::CostCenter => "COST_CENTER",
        }
    }
}

impl core::fmt::Display for WarehouseType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional descriptive metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarehouseDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsible: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_center_code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

/// Partial update of [`WarehouseDetails`]; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarehouseDetailsPatch {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub responsible: Option<String>,
    #[serde(default)]
    pub cost_center_code: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

impl WarehouseDetailsPatch {
    fn is_empty(&self) -> bool {
        self.location.is_none()
            && self.responsible.is_none()
            && self.cost_center_code.is_none()
            && self.categories.is_none()
    }

    fn applied_to(&self, current: &WarehouseDetails) -> WarehouseDetails {
        WarehouseDetails {
            location: self.location.clone().or_else(|| current.location.clone()),
            responsible: self.responsible.clone().or_else(|| current.responsible.clone()),
            cost_center_code: self
                .cost_center_code
                .clone()
                .or_else(|| current.cost_center_code.clone()),
            categories: self.categories.clone().unwrap_or_else(|| current.categories.clone()),
        }
    }
}

fn restored_from_snapshot() -> bool {
    true
}

/// Aggregate root: Warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warehouse {
    id: WarehouseId,
    project_id: Option<ProjectId>,
    partner_id: Option<PartnerId>,
    name: String,
    #[serde(rename = "type")]
    warehouse_type: WarehouseType,
    is_active: bool,
    #[serde(flatten)]
    details: WarehouseDetails,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    #[serde(skip, default = "restored_from_snapshot")]
    created: bool,
    #[serde(skip)]
    removed: bool,
}

impl Warehouse {
    /// Not-yet-created instance; the target of a `Create` command.
    pub fn empty(id: WarehouseId) -> Self {
        Self {
            id,
            project_id: None,
            partner_id: None,
            name: String::new(),
            warehouse_type: WarehouseType::Physical,
            is_active: false,
            details: WarehouseDetails::default(),
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
            removed: false,
        }
    }

    pub fn id_typed(&self) -> WarehouseId {
        self.id
    }

    pub fn project_id(&self) -> Option<ProjectId> {
        self.project_id
    }

    pub fn partner_id(&self) -> Option<PartnerId> {
        self.partner_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn warehouse_type(&self) -> WarehouseType {
        self.warehouse_type
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn details(&self) -> &WarehouseDetails {
        &self.details
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Whether the warehouse keeps stock quantities.
    pub fn bears_quantities(&self) -> bool {
        self.warehouse_type == WarehouseType::Physical
    }

    /// Movements may only be booked against active warehouses.
    pub fn ensure_active(&self) -> Result<(), DomainError> {
        if !self.is_active {
            return Err(DomainError::validation(format!(
                "warehouse {} is inactive",
                self.id
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for Warehouse {
    type Id = WarehouseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateWarehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateWarehouse {
    pub project_id: ProjectId,
    pub partner_id: Option<PartnerId>,
    pub warehouse_id: WarehouseId,
    pub name: String,
    pub warehouse_type: WarehouseType,
    pub details: WarehouseDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateWarehouse.
///
/// `warehouse_type` is accepted only so that an attempted change can be
/// rejected explicitly; repeating the current type is allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateWarehouse {
    pub project_id: ProjectId,
    pub warehouse_id: WarehouseId,
    pub name: Option<String>,
    pub warehouse_type: Option<WarehouseType>,
    pub details: WarehouseDetailsPatch,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetWarehouseActive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetWarehouseActive {
    pub project_id: ProjectId,
    pub warehouse_id: WarehouseId,
    pub active: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveWarehouse.
///
/// The caller looks up whether any movement references the warehouse (as
/// warehouse, source or target) and passes the answer in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveWarehouse {
    pub project_id: ProjectId,
    pub warehouse_id: WarehouseId,
    pub referenced_by_movements: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarehouseCommand {
    Create(CreateWarehouse),
    Update(UpdateWarehouse),
    SetActive(SetWarehouseActive),
    Remove(RemoveWarehouse),
}

/// Event: WarehouseCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseCreated {
    pub project_id: ProjectId,
    pub partner_id: Option<PartnerId>,
    pub warehouse_id: WarehouseId,
    pub name: String,
    pub warehouse_type: WarehouseType,
    pub details: WarehouseDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Event: WarehouseUpdated (carries the full new name and details).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseUpdated {
    pub project_id: ProjectId,
    pub warehouse_id: WarehouseId,
    pub name: String,
    pub details: WarehouseDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Event: WarehouseActivationChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseActivationChanged {
    pub project_id: ProjectId,
    pub warehouse_id: WarehouseId,
    pub active: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: WarehouseRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseRemoved {
    pub project_id: ProjectId,
    pub warehouse_id: WarehouseId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarehouseEvent {
    WarehouseCreated(WarehouseCreated),
    WarehouseUpdated(WarehouseUpdated),
    WarehouseActivationChanged(WarehouseActivationChanged),
    WarehouseRemoved(WarehouseRemoved),
}

impl Event for WarehouseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WarehouseEvent::WarehouseCreated(_) => "warehouse.created",
            WarehouseEvent::WarehouseUpdated(_) => "warehouse.updated",
            WarehouseEvent::WarehouseActivationChanged(_) => "warehouse.activation_changed",
            WarehouseEvent::WarehouseRemoved(_) => "warehouse.removed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            WarehouseEvent::WarehouseCreated(e) => e.occurred_at,
            WarehouseEvent::WarehouseUpdated(e) => e.occurred_at,
            WarehouseEvent::WarehouseActivationChanged(e) => e.occurred_at,
            WarehouseEvent::WarehouseRemoved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Warehouse {
    type Command = WarehouseCommand;
    type Event = WarehouseEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            WarehouseEvent::WarehouseCreated(e) => {
                self.project_id = Some(e.project_id);
                self.partner_id = e.partner_id;
                self.name = e.name.clone();
                self.warehouse_type = e.warehouse_type;
                self.details = e.details.clone();
                self.is_active = true;
                self.created_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
                self.created = true;
            }
            WarehouseEvent::WarehouseUpdated(e) => {
                self.name = e.name.clone();
                self.details = e.details.clone();
                self.updated_at = Some(e.occurred_at);
            }
            WarehouseEvent::WarehouseActivationChanged(e) => {
                self.is_active = e.active;
                self.updated_at = Some(e.occurred_at);
            }
            WarehouseEvent::WarehouseRemoved(e) => {
                self.is_active = false;
                self.removed = true;
                self.updated_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            WarehouseCommand::Create(cmd) => self.handle_create(cmd),
            WarehouseCommand::Update(cmd) => self.handle_update(cmd),
            WarehouseCommand::SetActive(cmd) => self.handle_set_active(cmd),
            WarehouseCommand::Remove(cmd) => self.handle_remove(cmd),
        }
    }
}

impl Warehouse {
    /// Existing warehouse in the caller's project, otherwise NotFound (a
    /// warehouse of another project is invisible, not forbidden).
    fn ensure_visible(&self, project_id: ProjectId, warehouse_id: WarehouseId) -> Result<(), DomainError> {
        if !self.created || self.removed || self.project_id != Some(project_id) || self.id != warehouse_id {
            return Err(DomainError::not_found(format!("warehouse {warehouse_id}")));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateWarehouse) -> Result<Vec<WarehouseEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("warehouse already exists"));
        }
        if self.id != cmd.warehouse_id {
            return Err(DomainError::validation("warehouse_id mismatch"));
        }
        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(vec![WarehouseEvent::WarehouseCreated(WarehouseCreated {
            project_id: cmd.project_id,
            partner_id: cmd.partner_id,
            warehouse_id: cmd.warehouse_id,
            name: name.to_string(),
            warehouse_type: cmd.warehouse_type,
            details: cmd.details.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateWarehouse) -> Result<Vec<WarehouseEvent>, DomainError> {
        self.ensure_visible(cmd.project_id, cmd.warehouse_id)?;

        if let Some(requested) = cmd.warehouse_type {
            if requested != self.warehouse_type {
                return Err(DomainError::validation(format!(
                    "warehouse type is immutable (is {}, requested {})",
                    self.warehouse_type, requested
                )));
            }
        }

        let name = match &cmd.name {
            Some(n) if n.trim().is_empty() => {
                return Err(DomainError::validation("name cannot be empty"));
            }
            Some(n) => n.trim().to_string(),
            None => self.name.clone(),
        };

        if name == self.name && cmd.details.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![WarehouseEvent::WarehouseUpdated(WarehouseUpdated {
            project_id: cmd.project_id,
            warehouse_id: cmd.warehouse_id,
            name,
            details: cmd.details.applied_to(&self.details),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_active(&self, cmd: &SetWarehouseActive) -> Result<Vec<WarehouseEvent>, DomainError> {
        self.ensure_visible(cmd.project_id, cmd.warehouse_id)?;

        if self.is_active == cmd.active {
            return Ok(vec![]);
        }

        Ok(vec![WarehouseEvent::WarehouseActivationChanged(WarehouseActivationChanged {
            project_id: cmd.project_id,
            warehouse_id: cmd.warehouse_id,
            active: cmd.active,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove(&self, cmd: &RemoveWarehouse) -> Result<Vec<WarehouseEvent>, DomainError> {
        self.ensure_visible(cmd.project_id, cmd.warehouse_id)?;

        if cmd.referenced_by_movements {
            return Err(DomainError::conflict(format!(
                "warehouse {} is referenced by stock movements; deactivate it instead",
                cmd.warehouse_id
            )));
        }

        Ok(vec![WarehouseEvent::WarehouseRemoved(WarehouseRemoved {
            project_id: cmd.project_id,
            warehouse_id: cmd.warehouse_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
