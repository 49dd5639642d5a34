//! # Permission Model
//!
//! A permission is a `(resource, action, scope)` triple. Its `name` is derived
//! from the triple on every save and must satisfy the permission name grammar.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};

use crate::rbac::permission_name::{
    PermissionScope, generate_permission_name, validate_permission_name,
};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "permissions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Derived `"{resource}.{action}[.{scope}]"`
    #[sea_orm(unique)]
    pub name: String,

    pub resource: String,

    pub action: String,

    /// `own`, `any`, or empty for unscoped permissions
    pub scope: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::role_permission::Entity")]
    RolePermission,
}

impl Related<super::role_permission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RolePermission.def()
    }
}

impl Related<super::role::Entity> for Entity {
    fn to() -> RelationDef {
        super::role_permission::Relation::Role.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::role_permission::Relation::Permission.def().rev())
    }
}

fn current_value<'a>(value: &'a ActiveValue<String>, field: &str) -> Result<&'a str, DbErr> {
    match value {
        ActiveValue::Set(v) | ActiveValue::Unchanged(v) => Ok(v.as_str()),
        ActiveValue::NotSet => Err(DbErr::Custom(format!(
            "invalid permission name: {field} is required"
        ))),
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let resource = current_value(&self.resource, "resource")?
            .trim()
            .to_lowercase();
        let action = current_value(&self.action, "action")?.trim().to_lowercase();
        let scope = match &self.scope {
            ActiveValue::Set(v) | ActiveValue::Unchanged(v) => v.trim().to_lowercase(),
            ActiveValue::NotSet => String::new(),
        };
        let scope: PermissionScope = scope.parse().map_err(|_| {
            DbErr::Custom(format!(
                "invalid permission name: scope '{scope}' must be own, any or empty"
            ))
        })?;

        let name = generate_permission_name(&resource, &action, scope.as_str());
        validate_permission_name(&name)
            .map_err(|e| DbErr::Custom(format!("invalid permission name '{name}': {e}")))?;

        self.resource = Set(resource);
        self.action = Set(action);
        self.scope = Set(scope.as_str().to_string());
        self.name = Set(name);
        Ok(self)
    }
}
