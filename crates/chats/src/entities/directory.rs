use serde::{Deserialize, Serialize};

use crate::types::{EmployeeId, TenantScope};

/// Employee directory entry, used to pick conversation members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: EmployeeId,
    #[serde(alias = "fullName", default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub designation: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// The signed-in user, as handed out by the grant exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: EmployeeId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(flatten)]
    pub scope: TenantScope,
}

impl UserProfile {
    pub fn new(id: EmployeeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: None,
            scope: TenantScope::default(),
        }
    }

    pub fn with_scope(mut self, scope: TenantScope) -> Self {
        self.scope = scope;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_reads_scope_fields() {
        let profile: UserProfile = serde_json::from_value(json!({
            "id": 5,
            "name": "Alice",
            "email": "alice@example.com",
            "workspaceId": 1,
            "stationId": 2,
            "companyId": 3
        }))
        .unwrap();

        assert_eq!(profile.scope.workspace_id, Some(1));
        assert_eq!(profile.scope.station_id, Some(2));
        assert_eq!(profile.scope.company_id, Some(3));
    }

    #[test]
    fn test_employee_accepts_full_name_alias() {
        let employee: Employee =
            serde_json::from_value(json!({ "id": 8, "fullName": "Bob Builder" })).unwrap();
        assert_eq!(employee.name, "Bob Builder");
        assert!(employee.email.is_none());
    }
}
