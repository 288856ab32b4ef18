//! Core services and their environment roles

use crate::compose::normalize_name;

/// Services the registry owns by convention. Every other name is a
/// third-party service.
pub const CORE_SERVICES: &[&str] = &[
    "mythic_server",
    "mythic_postgres",
    "mythic_graphql",
    "mythic_rabbitmq",
    "mythic_documentation",
    "mythic_nginx",
    "mythic_react",
    "mythic_jupyter",
];

/// Check whether a service belongs to the core set
pub fn is_core(name: &str) -> bool {
    let name = normalize_name(name);
    CORE_SERVICES.contains(&name.as_str())
}

/// Connection info section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// Operator-facing web endpoints
    Web,
    /// Backing services
    Additional,
}

/// A first-party role: which core service it is and which environment
/// variables say where it listens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvRole {
    /// Core service realizing the role
    pub service: &'static str,
    /// Display name
    pub label: &'static str,
    /// Host binding variable
    pub host_var: &'static str,
    /// Port variable
    pub port_var: &'static str,
    /// Flag telling whether the port is only published on loopback
    pub localhost_flag: &'static str,
    /// Address template with `{scheme}`, `{user}`, `{host}` and `{port}`
    pub address: &'static str,
    /// Flag switching `{scheme}` from http to https
    pub tls_flag: Option<&'static str>,
    /// Variable filling `{user}`
    pub user_var: Option<&'static str>,
    pub section: Section,
}

/// First-party roles, in connection info order
pub const ENV_ROLES: &[EnvRole] = &[
    EnvRole {
        service: "mythic_nginx",
        label: "Nginx (Web UI)",
        host_var: "NGINX_HOST",
        port_var: "NGINX_PORT",
        localhost_flag: "nginx_bind_localhost_only",
        address: "{scheme}://{host}:{port}",
        tls_flag: Some("NGINX_USE_SSL"),
        user_var: None,
        section: Section::Web,
    },
    EnvRole {
        service: "mythic_server",
        label: "Backend Server",
        host_var: "MYTHIC_SERVER_HOST",
        port_var: "MYTHIC_SERVER_PORT",
        localhost_flag: "mythic_server_bind_localhost_only",
        address: "{scheme}://{host}:{port}",
        tls_flag: None,
        user_var: None,
        section: Section::Web,
    },
    EnvRole {
        service: "mythic_graphql",
        label: "Hasura GraphQL Console",
        host_var: "HASURA_HOST",
        port_var: "HASURA_PORT",
        localhost_flag: "hasura_bind_localhost_only",
        address: "{scheme}://{host}:{port}",
        tls_flag: None,
        user_var: None,
        section: Section::Web,
    },
    EnvRole {
        service: "mythic_jupyter",
        label: "Jupyter Console",
        host_var: "JUPYTER_HOST",
        port_var: "JUPYTER_PORT",
        localhost_flag: "jupyter_bind_localhost_only",
        address: "{scheme}://{host}:{port}",
        tls_flag: None,
        user_var: None,
        section: Section::Web,
    },
    EnvRole {
        service: "mythic_documentation",
        label: "Internal Documentation",
        host_var: "DOCUMENTATION_HOST",
        port_var: "DOCUMENTATION_PORT",
        localhost_flag: "documentation_bind_localhost_only",
        address: "{scheme}://{host}:{port}",
        tls_flag: None,
        user_var: None,
        section: Section::Web,
    },
    EnvRole {
        service: "mythic_postgres",
        label: "Postgres Database",
        host_var: "POSTGRES_HOST",
        port_var: "POSTGRES_PORT",
        localhost_flag: "postgres_bind_localhost_only",
        address: "postgresql://mythic_user:password@{host}:{port}/mythic_db",
        tls_flag: None,
        user_var: None,
        section: Section::Additional,
    },
    EnvRole {
        service: "mythic_react",
        label: "React Server",
        host_var: "MYTHIC_REACT_HOST",
        port_var: "MYTHIC_REACT_PORT",
        localhost_flag: "mythic_react_bind_localhost_only",
        address: "{scheme}://{host}:{port}/new",
        tls_flag: None,
        user_var: None,
        section: Section::Additional,
    },
    EnvRole {
        service: "mythic_rabbitmq",
        label: "RabbitMQ",
        host_var: "RABBITMQ_HOST",
        port_var: "RABBITMQ_PORT",
        localhost_flag: "rabbitmq_bind_localhost_only",
        address: "amqp://{user}:password@{host}:{port}",
        tls_flag: None,
        user_var: Some("RABBITMQ_USER"),
        section: Section::Additional,
    },
];

/// Role realized by a core service
pub fn role_for(service: &str) -> Option<&'static EnvRole> {
    let service = normalize_name(service);
    ENV_ROLES.iter().find(|role| role.service == service)
}
