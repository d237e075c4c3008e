//! Equipment types: the external schema describing how an equipment CSV maps
//! onto graph predicates.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::convert::DataConv;
use crate::error::{LoaderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Int,
    Float,
}

impl DataType {
    pub fn conv(self) -> DataConv {
        match self {
            DataType::String => DataConv::Str,
            DataType::Int => DataConv::Int,
            DataType::Float => DataConv::Float,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub is_identifier: bool,
    #[serde(default)]
    pub is_parent_identifier: bool,
    #[serde(default)]
    pub is_displayed: bool,
    #[serde(default)]
    pub is_searchable: bool,
    /// CSV column holding the attribute.
    pub mapped_to: String,
}

impl Attribute {
    fn new(name: &str, data_type: DataType, mapped_to: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            is_identifier: false,
            is_parent_identifier: false,
            is_displayed: true,
            is_searchable: true,
            mapped_to: mapped_to.to_string(),
        }
    }

    fn identifier(name: &str, mapped_to: &str) -> Self {
        Self {
            is_identifier: true,
            ..Self::new(name, DataType::String, mapped_to)
        }
    }

    fn parent() -> Self {
        Self {
            is_parent_identifier: true,
            is_searchable: false,
            ..Self::new("Parent", DataType::String, "parent_id")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentType {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    /// File name this type is loaded from, e.g. `equipment_server.csv`.
    pub source_name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl EquipmentType {
    /// The single attribute flagged as identifier.
    pub fn primary_key_attribute(&self) -> Result<&Attribute> {
        let mut ids = self.attributes.iter().filter(|a| a.is_identifier);
        match (ids.next(), ids.next()) {
            (Some(attr), None) => Ok(attr),
            (None, _) => Err(LoaderError::EquipmentType(format!(
                "{}: primary key attribute is not found",
                self.type_name
            ))),
            (Some(_), Some(_)) => Err(LoaderError::EquipmentType(format!(
                "{}: more than one identifier attribute",
                self.type_name
            ))),
        }
    }

    pub fn parent_key_attribute(&self) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.is_parent_identifier)
    }
}

// ============================================================================
// Repository
// ============================================================================

#[async_trait]
pub trait EquipmentTypeRepository: Send + Sync {
    async fn equipment_types(&self) -> Result<Vec<EquipmentType>>;

    /// Persist `eq_type` and return it with its assigned id.
    async fn create_equipment_type(&self, eq_type: EquipmentType) -> Result<EquipmentType>;
}

fn insert_new(types: &mut Vec<EquipmentType>, mut eq_type: EquipmentType) -> Result<EquipmentType> {
    if types.iter().any(|t| t.type_name == eq_type.type_name) {
        return Err(LoaderError::EquipmentType(format!(
            "{}: type already exists",
            eq_type.type_name
        )));
    }
    eq_type.primary_key_attribute()?;
    if let Some(parent) = &eq_type.parent_id {
        if !types.iter().any(|t| &t.id == parent) {
            return Err(LoaderError::EquipmentType(format!(
                "{}: unknown parent {parent}",
                eq_type.type_name
            )));
        }
    }
    eq_type.id = format!("eqtype-{}", types.len() + 1);
    types.push(eq_type.clone());
    Ok(eq_type)
}

#[derive(Debug, Default)]
pub struct MemoryEquipmentTypeRepository {
    types: Mutex<Vec<EquipmentType>>,
}

impl MemoryEquipmentTypeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types(types: Vec<EquipmentType>) -> Self {
        Self {
            types: Mutex::new(types),
        }
    }
}

#[async_trait]
impl EquipmentTypeRepository for MemoryEquipmentTypeRepository {
    async fn equipment_types(&self) -> Result<Vec<EquipmentType>> {
        Ok(self.types.lock().clone())
    }

    async fn create_equipment_type(&self, eq_type: EquipmentType) -> Result<EquipmentType> {
        insert_new(&mut self.types.lock(), eq_type)
    }
}

/// Equipment types stored as a JSON array. A missing file reads as empty.
#[derive(Debug)]
pub struct JsonEquipmentTypeRepository {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonEquipmentTypeRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<EquipmentType>> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(LoaderError::io(&self.path, e)),
        }
    }
}

#[async_trait]
impl EquipmentTypeRepository for JsonEquipmentTypeRepository {
    async fn equipment_types(&self) -> Result<Vec<EquipmentType>> {
        self.read_all().await
    }

    async fn create_equipment_type(&self, eq_type: EquipmentType) -> Result<EquipmentType> {
        let _guard = self.write_lock.lock().await;
        let mut types = self.read_all().await?;
        let created = insert_new(&mut types, eq_type)?;
        let data = serde_json::to_vec_pretty(&types)?;
        tokio::fs::write(&self.path, data)
            .await
            .map_err(|e| LoaderError::io(&self.path, e))?;
        Ok(created)
    }
}

// ============================================================================
// Built-in types
// ============================================================================

/// Built-in hierarchy, root first: datacenter, vcenter, cluster, server,
/// partition.
pub fn default_equipment_types() -> Vec<EquipmentType> {
    use DataType::{Float, Int};

    let eq = |type_name: &str, attributes: Vec<Attribute>| EquipmentType {
        id: String::new(),
        type_name: type_name.to_string(),
        source_name: format!("equipment_{type_name}.csv"),
        parent_id: None,
        attributes,
    };
    let s = |name: &str, column: &str| Attribute::new(name, DataType::String, column);

    vec![
        eq("datacenter", vec![Attribute::identifier("Name", "datacenter_name")]),
        eq(
            "vcenter",
            vec![Attribute::identifier("VcenterName", "vcenter_name"), Attribute::parent()],
        ),
        eq(
            "cluster",
            vec![Attribute::identifier("ClusterName", "cluster_name"), Attribute::parent()],
        ),
        eq(
            "server",
            vec![
                Attribute::identifier("HostName", "server_hostname"),
                s("ServerCode", "server_code"),
                s("ServerManufacturer", "server_manufacturer"),
                s("ServerModel", "server_model"),
                s("ServerSerialNumber", "server_serialNumber"),
                s("ServerDateInstallation", "server_DateInstallation"),
                s("ServerProprietaryEntity", "server_proprietaryEntity"),
                s("ServerHostingEntity", "server_hostingEntity"),
                s("ServerUserEntity", "server_userEntity"),
                s("ServerSite", "server_Site"),
                s("ServerCPU", "server_cpu"),
                Attribute::new("ServerProcessorsNumber", Int, "server_processorsNumber"),
                Attribute::new("ServerCoresNumber", Int, "server_coresNumber"),
                Attribute::parent(),
                Attribute::new("OracleCoreFactor", Float, "corefactor_oracle"),
                Attribute::new("SAG", Float, "sag"),
                Attribute::new("PVU", Int, "pvu"),
            ],
        ),
        eq(
            "partition",
            vec![
                Attribute::identifier("HostName", "partition_hostname"),
                s("PartitionCode", "partition_code"),
                s("PartitionRole", "partition_role"),
                s("Environment", "partition_environment"),
                s("PartitionShortOs", "partition_shortOS"),
                s("PartitionNormalizedOs", "partition_normalizedOS"),
                s("CPU", "partition_cpu"),
                s("ProcessorNumber", "partition_processorsNumber"),
                s("CoresNumber", "partition_coresNumber"),
                Attribute::parent(),
            ],
        ),
    ]
}

/// Create the built-in types, each parented to the previous one. Types that
/// already exist are reused so the operation can be repeated. The types are
/// not linked to an equipment metadata node.
pub async fn load_default_equipment_types(
    repo: &dyn EquipmentTypeRepository,
) -> Result<Vec<EquipmentType>> {
    let existing = repo.equipment_types().await?;
    let mut created: Vec<EquipmentType> = Vec::new();

    for mut eq_type in default_equipment_types() {
        if let Some(found) = existing.iter().find(|t| t.type_name == eq_type.type_name) {
            tracing::info!(eq_type = %found.type_name, id = %found.id, "equipment type already present");
            created.push(found.clone());
            continue;
        }
        eq_type.parent_id = created.last().map(|p| p.id.clone());
        let eq_type = repo.create_equipment_type(eq_type).await?;
        tracing::info!(eq_type = %eq_type.type_name, id = %eq_type.id, "created equipment type");
        created.push(eq_type);
    }

    Ok(created)
}
