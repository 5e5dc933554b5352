//! Rendering of the per-tenant gateway configuration file.
//!
//! The output is a pure function of its inputs; its SHA-256 is the idempotency
//! key the orchestrator compares against the file already on disk.

use secrecy::{ExposeSecret as _, SecretString};
use sha2::{Digest as _, Sha256};
use url::form_urlencoded;

/// Static gateway settings that are identical for every tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub db_schemas: String,
    pub db_anon_role: String,
    pub db_pool: u16,
    pub server_port: u16,
    pub admin_port: u16,
}

/// Everything that varies per tenant.
#[derive(Debug)]
pub struct RenderInput<'input> {
    pub tenant_id: &'input str,
    pub db_name: &'input str,
    pub db_password: &'input SecretString,
    pub jwt_secret: &'input SecretString,
    /// Host of the pooling proxy the gateway connects through.
    pub host: &'input str,
    /// Port of the pooling proxy the gateway connects through.
    pub port: u16,
}

/// Renders the gateway configuration text.
#[must_use]
pub fn render(input: &RenderInput<'_>, settings: &GatewaySettings) -> String {
    let RenderInput {
        tenant_id,
        db_name,
        db_password,
        jwt_secret,
        host,
        port,
    } = *input;
    let password = encode_userinfo(db_password.expose_secret());
    let jwt_secret = escape_quoted(jwt_secret.expose_secret());

    format!(
        concat!(
            "# Generated by tenantgate for tenant {tenant}. Do not edit.\n",
            "db-uri = \"postgres://{tenant}:{password}@{host}:{port}/{tenant}\"\n",
            "db-schemas = \"{schemas}\"\n",
            "db-anon-role = \"{anon}\"\n",
            "db-pool = {pool}\n",
            "jwt-secret = \"{jwt}\"\n",
            "server-host = \"*\"\n",
            "server-port = {server_port}\n",
            "admin-server-port = {admin_port}\n",
            "app.settings.tenant_id = \"{tenant}\"\n",
            "app.settings.database = \"{db_name}\"\n",
        ),
        tenant = tenant_id,
        password = password,
        host = host,
        port = port,
        schemas = escape_quoted(&settings.db_schemas),
        anon = escape_quoted(&settings.db_anon_role),
        pool = settings.db_pool,
        jwt = jwt_secret,
        server_port = settings.server_port,
        admin_port = settings.admin_port,
        db_name = escape_quoted(db_name),
    )
}

/// Lowercase hex SHA-256 of the rendered text.
#[must_use]
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Percent-encodes a value for the userinfo part of a connection URI.
///
/// `form_urlencoded` maps a space to `+` and a literal `+` to `%2B`, so every
/// remaining `+` stands for a space.
fn encode_userinfo(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Escapes a value embedded between double quotes.
fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
