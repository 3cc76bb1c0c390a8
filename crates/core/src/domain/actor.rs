use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub i64);

/// Role capability carried by an authenticated actor. Authentication and
/// role storage live outside this crate; the directory hands us the
/// resolved capability once per request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Sales,
    Csr,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Sales => "S",
            Role::Csr => "C",
            Role::Manager => "M",
            Role::Admin => "A",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "S" => Some(Role::Sales),
            "C" => Some(Role::Csr),
            "M" => Some(Role::Manager),
            "A" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

impl Actor {
    pub fn is_sales(&self) -> bool {
        self.role == Role::Sales
    }

    pub fn is_csr(&self) -> bool {
        self.role == Role::Csr
    }

    pub fn is_manager(&self) -> bool {
        self.role == Role::Manager
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// CSR and manager roles operate on any quote; everyone else only on
    /// quotes they own.
    pub fn oversees_all_quotes(&self) -> bool {
        self.is_csr() || self.is_manager()
    }
}

#[cfg(test)]
mod tests {
    use super::{Actor, ActorId, Role};

    #[test]
    fn role_codes_round_trip() {
        for role in [Role::Sales, Role::Csr, Role::Manager, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("X"), None);
    }

    #[test]
    fn only_csr_and_manager_oversee_all_quotes() {
        let actor = |role| Actor {
            id: ActorId(1),
            first_name: "Maria".to_owned(),
            last_name: "Garcia".to_owned(),
            role,
        };

        assert!(!actor(Role::Sales).oversees_all_quotes());
        assert!(actor(Role::Csr).oversees_all_quotes());
        assert!(actor(Role::Manager).oversees_all_quotes());
        assert!(!actor(Role::Admin).oversees_all_quotes());
    }
}
