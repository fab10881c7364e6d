/// Built-in node handlers
///
/// `NodeExecutor` holds the resources the built-in node kinds share (the
/// event bus, an HTTP client, open SQLite pools) and dispatches on
/// `NodeKind`. Each built-in kind is registered in the `NodeHandlerRegistry`
/// as a thin `BuiltinHandler` pointing back here, so extension handlers and
/// built-ins are resolved the same way.
///
/// Browser, spreadsheet and e-mail nodes have no automation backend in this
/// crate and report `status: "simulated"`.

use crate::runtime::events::EventBus;
use crate::runtime::expression::{evaluate_condition, interpolate, render};
use crate::runtime::registry::{NodeContext, NodeHandler, NodeHandlerRegistry};
use crate::workflow::types::{NodeKind, Variables};
use crate::error::EngineError;
use anyhow::Result;
use async_trait::async_trait;
use mlua::LuaSerdeExt;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Shared resources and dispatch for the built-in node kinds
#[derive(Debug)]
pub struct NodeExecutor {
    event_bus: Arc<EventBus>,
    http: reqwest::Client,
    /// connection_id -> open pool, populated by `database_connect`
    db_pools: RwLock<HashMap<String, SqlitePool>>,
}

/// Registry entry for one built-in kind
struct BuiltinHandler {
    executor: Arc<NodeExecutor>,
}

#[async_trait]
impl NodeHandler for BuiltinHandler {
    async fn execute(&self, ctx: &mut NodeContext) -> Result<Value> {
        self.executor.execute_builtin(ctx).await
    }
}

impl NodeExecutor {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            event_bus,
            http: reqwest::Client::new(),
            db_pools: RwLock::new(HashMap::new()),
        }
    }

    /// Register every built-in kind in `registry`
    pub fn register_builtins(self: &Arc<Self>, registry: &NodeHandlerRegistry) {
        for kind in NodeKind::BUILTIN.iter() {
            registry.register(
                kind.as_str(),
                Arc::new(BuiltinHandler {
                    executor: Arc::clone(self),
                }),
            );
        }
        tracing::info!("🧩 Registered {} built-in node handlers", NodeKind::BUILTIN.len());
    }

    /// Number of SQLite pools currently open
    pub async fn open_connections(&self) -> usize {
        self.db_pools.read().await.len()
    }

    /// Run a built-in node kind against its context
    pub async fn execute_builtin(&self, ctx: &mut NodeContext) -> Result<Value> {
        tracing::debug!("⚡ Executing {} handler for node '{}'", ctx.kind, ctx.node_id);

        match ctx.kind.clone() {
            NodeKind::Start => Ok(json!({
                "status": "started",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
            NodeKind::End => Ok(json!({
                "status": "completed",
                "message": ctx.param_or("message", "Workflow completed"),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
            NodeKind::BrowserOpen => Ok(json!({
                "status": "simulated",
                "action": "browser_open",
                "browser": ctx.param_or("browser", "chrome"),
                "headless": ctx.param("headless").and_then(|v| v.as_bool()).unwrap_or(false),
            })),
            NodeKind::BrowserNavigate => Ok(json!({
                "status": "simulated",
                "action": "browser_navigate",
                "url": ctx.param_or("url", ""),
            })),
            NodeKind::BrowserExtract => self.browser_extract(ctx),
            NodeKind::BrowserClose => Ok(json!({ "status": "simulated", "action": "browser_close" })),
            NodeKind::ExcelRead => self.excel_read(ctx),
            NodeKind::ExcelWrite => {
                let rows = variable_len(&ctx.variables, ctx.param_or("data_source", ""));
                Ok(json!({
                    "status": "simulated",
                    "file_path": ctx.param_or("file_path", ""),
                    "rows_written": rows,
                }))
            }
            NodeKind::EmailSend => Ok(json!({
                "status": "simulated",
                "to": ctx.param_or("to", ""),
                "subject": ctx.param_or("subject", ""),
            })),
            NodeKind::FileScan => self.file_scan(ctx).await,
            NodeKind::FileMkdir => self.file_mkdir(ctx).await,
            NodeKind::FileMove => self.file_move(ctx).await,
            NodeKind::FileWrite => self.file_write(ctx).await,
            NodeKind::HttpRequest => self.http_request(ctx).await,
            NodeKind::Script => self.script(ctx).await,
            NodeKind::Condition => self.condition(ctx),
            NodeKind::Loop => {
                let count = match ctx.param("items") {
                    Some(Value::Array(items)) => items.len(),
                    Some(Value::String(name)) => variable_len(&ctx.variables, name),
                    _ => 0,
                };
                Ok(json!({ "status": "completed", "loop_started": true, "item_count": count }))
            }
            NodeKind::LoopEnd => Ok(json!({ "status": "completed", "loop_ended": true })),
            NodeKind::TemplateRender => {
                let rendered = interpolate(ctx.param_or("template", ""), &ctx.variables);
                let output_variable = ctx.param_or("output_variable", "rendered_content").to_string();
                ctx.variables.insert(output_variable.clone(), Value::String(rendered));
                Ok(json!({ "status": "completed", "output_variable": output_variable }))
            }
            NodeKind::Log => self.log(ctx).await,
            NodeKind::DatabaseConnect => self.database_connect(ctx).await,
            NodeKind::DatabaseQuery => self.database_query(ctx).await,
            NodeKind::DatabaseExecute => self.database_execute(ctx).await,
            NodeKind::DatabaseBulkInsert => self.database_bulk_insert(ctx).await,
            NodeKind::DatabaseClose => self.database_close(ctx).await,
            NodeKind::Custom(name) => Err(EngineError::UnknownNodeType(name).into()),
        }
    }

    fn browser_extract(&self, ctx: &mut NodeContext) -> Result<Value> {
        let variable_name = ctx.param_or("variable_name", "extracted_data").to_string();
        let data = json!(["Sample data 1", "Sample data 2", "Sample data 3"]);
        ctx.variables.insert(variable_name, data.clone());
        Ok(json!({
            "status": "simulated",
            "action": "browser_extract",
            "selector": ctx.param_or("selector", ""),
            "data": data,
        }))
    }

    fn excel_read(&self, ctx: &mut NodeContext) -> Result<Value> {
        let variable_name = ctx.param_or("variable_name", "excel_data").to_string();
        let rows = json!([
            { "Column1": "Value1", "Column2": "Value2" },
            { "Column1": "Value3", "Column2": "Value4" },
            { "Column1": "Value5", "Column2": "Value6" },
        ]);
        ctx.variables.insert(variable_name, rows);
        Ok(json!({
            "status": "simulated",
            "file_path": ctx.param_or("file_path", ""),
            "rows_read": 3,
        }))
    }

    /// List files in `directory` whose names match `pattern` (`*` wildcard)
    async fn file_scan(&self, ctx: &mut NodeContext) -> Result<Value> {
        let directory = ctx.require_str("directory")?.to_string();
        let pattern = ctx.param_or("pattern", "*").to_string();
        let variable_name = ctx.param_or("variable_name", "file_list").to_string();

        let mut entries = tokio::fs::read_dir(&directory)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to scan directory '{}': {}", directory, e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if glob_match(&pattern, &name) {
                files.push(entry.path().to_string_lossy().to_string());
            }
        }
        files.sort();

        tracing::debug!("📂 Found {} files in '{}' matching '{}'", files.len(), directory, pattern);
        let found = files.len();
        ctx.variables.insert(variable_name, json!(files));
        Ok(json!({ "status": "completed", "directory": directory, "files_found": found }))
    }

    async fn file_mkdir(&self, ctx: &mut NodeContext) -> Result<Value> {
        let directory = ctx.require_str("directory")?;
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create directory '{}': {}", directory, e))?;
        Ok(json!({ "status": "completed", "directory": directory }))
    }

    async fn file_move(&self, ctx: &mut NodeContext) -> Result<Value> {
        let source = ctx.require_str("source")?;
        let destination = ctx.require_str("destination")?;
        if let Some(parent) = Path::new(destination).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(source, destination)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to move '{}' to '{}': {}", source, destination, e))?;
        Ok(json!({ "status": "completed", "source": source, "destination": destination }))
    }

    /// `content` names a variable whose value is written; anything else is written literally
    async fn file_write(&self, ctx: &mut NodeContext) -> Result<Value> {
        let file_path = ctx.require_str("file_path")?;
        let content_key = ctx.param_or("content", "");
        let content = match ctx.variables.get(content_key) {
            Some(value) => interpolate(&render(value), &ctx.variables),
            None => content_key.to_string(),
        };

        if let Some(parent) = Path::new(file_path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(file_path, content.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write '{}': {}", file_path, e))?;
        Ok(json!({ "status": "completed", "file_path": file_path, "bytes_written": content.len() }))
    }

    async fn http_request(&self, ctx: &mut NodeContext) -> Result<Value> {
        let url = ctx.require_str("url")?.to_string();
        let method = ctx.param_or("method", "GET").to_uppercase();
        let response_variable = ctx.param_or("response_variable", "http_response").to_string();
        let timeout = ctx
            .param("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

        tracing::debug!("🌍 HTTP Request: {} {}", method, url);

        let mut request = match method.as_str() {
            "GET" => self.http.get(&url),
            "POST" => self.http.post(&url),
            "PUT" => self.http.put(&url),
            "DELETE" => self.http.delete(&url),
            "PATCH" => self.http.patch(&url),
            _ => return Err(anyhow::anyhow!("Unsupported HTTP method: {}", method)),
        }
        .timeout(Duration::from_secs(timeout));

        if let Some(headers) = ctx.param("headers").and_then(|h| h.as_object()) {
            for (key, value) in headers {
                if let Some(header_value) = value.as_str() {
                    request = request.header(key.as_str(), header_value);
                }
            }
        }
        match ctx.param("body") {
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(body) if !body.is_null() => request = request.json(body),
            _ => {}
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request failed: {}", e))?;
        let status = response.status();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), json!(s))))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read response body: {}", e))?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        tracing::info!("✅ HTTP request completed: {} {} (status: {})", method, url, status);

        ctx.variables.insert(
            response_variable,
            json!({ "status_code": status.as_u16(), "headers": headers, "body": body }),
        );
        Ok(json!({
            "status": "completed",
            "method": method,
            "url": url,
            "status_code": status.as_u16(),
            "success": status.is_success(),
        }))
    }

    /// Run the node's Lua script on a blocking thread
    async fn script(&self, ctx: &mut NodeContext) -> Result<Value> {
        let script = ctx.param_or("script", "").to_string();
        if script.trim().is_empty() {
            return Ok(json!({ "status": "completed", "output": "Empty script", "error": null }));
        }

        let variables = ctx.variables.clone();
        let started = std::time::Instant::now();
        let outcome = tokio::task::spawn_blocking(move || run_lua_script(&script, &variables))
            .await
            .map_err(|e| anyhow::anyhow!("Script task panicked: {}", e))??;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        for (name, value) in &outcome.updated {
            ctx.variables.insert(name.clone(), value.clone());
        }

        let output = outcome.output_text();
        match outcome.error {
            None => {
                tracing::debug!("📄 Script output for '{}': {}", ctx.node_id, output);
                Ok(json!({
                    "status": "completed",
                    "output": output,
                    "error": null,
                    "execution_time_ms": elapsed_ms,
                    "updated_variables": outcome.updated,
                }))
            }
            Some(error) => {
                tracing::warn!("⚠️ Script in node '{}' failed: {}", ctx.node_id, error);
                Ok(json!({
                    "status": "failed",
                    "output": format!("Script execution failed:\n{}\n\n{}", error, output),
                    "error": error,
                    "execution_time_ms": elapsed_ms,
                    "updated_variables": {},
                }))
            }
        }
    }

    fn condition(&self, ctx: &mut NodeContext) -> Result<Value> {
        // Evaluate the uninterpolated text so substituted values never change the parse
        let condition = ctx
            .raw_config
            .get("condition")
            .and_then(|v| v.as_str())
            .unwrap_or("true")
            .to_string();
        let result = evaluate_condition(&condition, &ctx.variables)
            .map_err(|e| anyhow::anyhow!("Invalid condition '{}': {}", condition, e))?;
        if let Some(name) = ctx.param_str("result_variable").map(str::to_string) {
            ctx.variables.insert(name, Value::Bool(result));
        }
        Ok(json!({ "status": "completed", "condition": condition, "result": result }))
    }

    async fn log(&self, ctx: &mut NodeContext) -> Result<Value> {
        let level = ctx.param_or("level", "info").to_lowercase();
        let message = ctx.param_or("message", "").to_string();

        match level.as_str() {
            "error" => tracing::error!("📝 [{}] {}", ctx.node_id, message),
            "warn" | "warning" => tracing::warn!("📝 [{}] {}", ctx.node_id, message),
            "debug" => tracing::debug!("📝 [{}] {}", ctx.node_id, message),
            _ => tracing::info!("📝 [{}] {}", ctx.node_id, message),
        }

        self.event_bus
            .emit(
                "workflow.log",
                json!({
                    "execution_id": ctx.execution_id,
                    "node_id": ctx.node_id,
                    "level": level,
                    "message": message,
                }),
            )
            .await;
        Ok(json!({ "status": "completed", "level": level, "message": message }))
    }

    async fn database_connect(&self, ctx: &mut NodeContext) -> Result<Value> {
        let connection_string = ctx.param_or("connection_string", "sqlite::memory:").to_string();
        let connection_variable = ctx.param_or("connection_variable", "db_connection").to_string();

        let options = SqliteConnectOptions::from_str(&connection_string)
            .map_err(|e| anyhow::anyhow!("Invalid connection string '{}': {}", connection_string, e))?
            .create_if_missing(true);
        // One connection keeps `sqlite::memory:` a single database across nodes
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| anyhow::anyhow!("Database connection failed: {}", e))?;

        let connection_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        self.db_pools.write().await.insert(connection_id.clone(), pool);
        tracing::info!("🗄️ Opened database connection {} ({})", connection_id, connection_string);

        ctx.variables.insert(
            connection_variable.clone(),
            json!({ "status": "connected", "connection_id": connection_id }),
        );
        Ok(json!({
            "status": "completed",
            "connection_variable": connection_variable,
            "connection_id": connection_id,
        }))
    }

    /// Resolve the pool named by the node's `connection` variable
    async fn pool_for(&self, ctx: &NodeContext) -> Result<SqlitePool> {
        let variable = ctx.param_or("connection", "db_connection");
        let connection_id = ctx
            .variables
            .get(variable)
            .and_then(|handle| handle.get("connection_id"))
            .and_then(|id| id.as_str())
            .ok_or_else(|| anyhow::anyhow!("No open database connection in variable '{}'", variable))?;
        self.db_pools
            .read()
            .await
            .get(connection_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Database connection {} is closed", connection_id))
    }

    async fn database_query(&self, ctx: &mut NodeContext) -> Result<Value> {
        let pool = self.pool_for(ctx).await?;
        let query = ctx.require_str("query")?.to_string();
        let result_variable = ctx.param_or("result_variable", "query_result").to_string();

        tracing::debug!("📝 SQL Query: {}", query);
        let rows = sqlx::query(&query)
            .fetch_all(&pool)
            .await
            .map_err(|e| anyhow::anyhow!("Database query failed: {}", e))?;
        let records: Vec<Value> = rows.iter().map(row_to_json).collect();
        let returned = records.len();

        ctx.variables.insert(result_variable, Value::Array(records));
        Ok(json!({ "status": "completed", "query": query, "rows_returned": returned }))
    }

    async fn database_execute(&self, ctx: &mut NodeContext) -> Result<Value> {
        let pool = self.pool_for(ctx).await?;
        let query = ctx.require_str("query")?;
        let outcome = sqlx::query(query)
            .execute(&pool)
            .await
            .map_err(|e| anyhow::anyhow!("Database execute failed: {}", e))?;
        Ok(json!({ "status": "completed", "query": query, "rows_affected": outcome.rows_affected() }))
    }

    /// Insert every object of the `data_source` array; columns come from the first row
    async fn database_bulk_insert(&self, ctx: &mut NodeContext) -> Result<Value> {
        let pool = self.pool_for(ctx).await?;
        let table = ctx.require_str("table")?.to_string();
        validate_identifier(&table)?;
        let data_source = ctx.param_or("data_source", "");
        let rows = match ctx.variables.get(data_source) {
            Some(Value::Array(rows)) => rows.clone(),
            _ => Vec::new(),
        };
        let Some(Value::Object(first)) = rows.first() else {
            return Ok(json!({ "status": "completed", "table": table, "rows_inserted": 0 }));
        };

        let columns: Vec<String> = first.keys().cloned().collect();
        for column in &columns {
            validate_identifier(column)?;
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!("INSERT INTO {} ({}) VALUES ({})", table, columns.join(", "), placeholders);

        let mut tx = pool.begin().await?;
        for row in &rows {
            let mut query = sqlx::query(&sql);
            for column in &columns {
                query = match row.get(column).unwrap_or(&Value::Null) {
                    Value::Null => query.bind(None::<String>),
                    Value::Bool(b) => query.bind(*b),
                    Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
                    Value::Number(n) => query.bind(n.as_f64()),
                    Value::String(s) => query.bind(s.clone()),
                    other => query.bind(other.to_string()),
                };
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow::anyhow!("Bulk insert into '{}' failed: {}", table, e))?;
        }
        tx.commit().await?;

        tracing::info!("💾 Inserted {} rows into {}", rows.len(), table);
        Ok(json!({ "status": "completed", "table": table, "rows_inserted": rows.len() }))
    }

    async fn database_close(&self, ctx: &mut NodeContext) -> Result<Value> {
        let variable = ctx.param_or("connection", "db_connection").to_string();
        let handle = ctx.variables.remove(&variable);
        let connection_id = handle
            .as_ref()
            .and_then(|h| h.get("connection_id"))
            .and_then(|id| id.as_str());

        if let Some(connection_id) = connection_id {
            if let Some(pool) = self.db_pools.write().await.remove(connection_id) {
                pool.close().await;
                tracing::info!("🔒 Closed database connection {}", connection_id);
            }
        }
        Ok(json!({ "status": "completed", "connection_closed": true }))
    }
}

fn variable_len(variables: &Variables, name: &str) -> usize {
    match variables.get(name) {
        Some(Value::Array(items)) => items.len(),
        Some(Value::Object(map)) => map.len(),
        _ => 0,
    }
}

/// Table and column names are spliced into SQL, so only plain identifiers pass
fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(anyhow::anyhow!("Invalid SQL identifier: {}", name));
    }
    Ok(())
}

/// SQLite row to a JSON object, trying integer, then real, then text per column
fn row_to_json(row: &SqliteRow) -> Value {
    let mut record = serde_json::Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
            json!(v)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
            json!(v)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(i) {
            json!(v)
        } else {
            Value::Null
        };
        record.insert(column.name().to_string(), value);
    }
    Value::Object(record)
}

/// Match a file name against a pattern where `*` matches any run of characters
fn glob_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let mut rest = name;
    let first = parts[0];
    if !rest.starts_with(first) {
        return false;
    }
    rest = &rest[first.len()..];

    let last = parts[parts.len() - 1];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

/// Result of one Lua script run
#[derive(Debug, Default)]
struct ScriptOutcome {
    stdout: String,
    stderr: String,
    /// Globals the script created or changed that convert to JSON
    updated: Variables,
    error: Option<String>,
}

impl ScriptOutcome {
    fn output_text(&self) -> String {
        let mut sections = Vec::new();
        if !self.stdout.is_empty() {
            sections.push(format!("STDOUT:\n{}", self.stdout));
        }
        if !self.stderr.is_empty() {
            sections.push(format!("STDERR:\n{}", self.stderr));
        }
        if sections.is_empty() {
            "Script executed successfully (no output)".to_string()
        } else {
            sections.join("\n")
        }
    }
}

/// Execute `script` with `variables` as globals, capturing `print` and `warn`
///
/// Lua state is not `Send`, so this runs start to finish on one blocking thread.
/// Setup failures are errors; a failing script is reported in the outcome.
fn run_lua_script(script: &str, variables: &Variables) -> Result<ScriptOutcome> {
    let lua = mlua::Lua::new();
    let globals = lua.globals();

    let builtin_names: HashSet<String> = globals
        .pairs::<mlua::Value, mlua::Value>()
        .filter_map(|pair| pair.ok())
        .filter_map(|(key, _)| match key {
            mlua::Value::String(s) => s.to_str().ok().map(|s| s.to_string()),
            _ => None,
        })
        .collect();

    let stdout = Rc::new(RefCell::new(String::new()));
    let stderr = Rc::new(RefCell::new(String::new()));

    let tostring: mlua::Function = globals
        .get("tostring")
        .map_err(|e| anyhow::anyhow!("Lua runtime missing tostring: {}", e))?;
    let out = Rc::clone(&stdout);
    let print = lua
        .create_function(move |_, args: mlua::Variadic<mlua::Value>| {
            let mut parts = Vec::with_capacity(args.len());
            for arg in args.iter() {
                parts.push(tostring.call::<String>(arg.clone())?);
            }
            let mut buffer = out.borrow_mut();
            buffer.push_str(&parts.join("\t"));
            buffer.push('\n');
            Ok(())
        })
        .map_err(|e| anyhow::anyhow!("Failed to create print function: {}", e))?;
    let err = Rc::clone(&stderr);
    let warn = lua
        .create_function(move |_, args: mlua::Variadic<String>| {
            let mut buffer = err.borrow_mut();
            buffer.push_str(&args.concat());
            buffer.push('\n');
            Ok(())
        })
        .map_err(|e| anyhow::anyhow!("Failed to create warn function: {}", e))?;
    globals
        .set("print", print)
        .and_then(|_| globals.set("warn", warn))
        .map_err(|e| anyhow::anyhow!("Failed to install output capture: {}", e))?;

    for (name, value) in variables {
        let lua_value = lua
            .to_value(value)
            .map_err(|e| anyhow::anyhow!("Failed to pass variable '{}' to Lua: {}", name, e))?;
        globals
            .set(name.as_str(), lua_value)
            .map_err(|e| anyhow::anyhow!("Failed to set Lua global '{}': {}", name, e))?;
    }

    let mut outcome = ScriptOutcome::default();
    if let Err(e) = lua.load(script).set_name("script").exec() {
        outcome.error = Some(e.to_string());
    } else {
        for pair in globals.pairs::<mlua::Value, mlua::Value>() {
            let Ok((mlua::Value::String(key), value)) = pair else {
                continue;
            };
            let Ok(name) = key.to_str().map(|s| s.to_string()) else {
                continue;
            };
            let is_input = variables.contains_key(&name);
            if builtin_names.contains(&name) && !is_input {
                continue;
            }
            match lua.from_value::<Value>(value) {
                Ok(json_value) => {
                    if variables.get(&name) != Some(&json_value) {
                        outcome.updated.insert(name, json_value);
                    }
                }
                Err(e) if is_input => {
                    tracing::warn!("⚠️ Variable '{}' is no longer JSON-convertible, keeping previous value: {}", name, e);
                }
                Err(_) => {
                    tracing::warn!("⚠️ Skipping non-serializable script global: {}", name);
                }
            }
        }
    }

    outcome.stdout = stdout.borrow().clone();
    outcome.stderr = stderr.borrow().clone();
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> Arc<NodeExecutor> {
        Arc::new(NodeExecutor::new(Arc::new(EventBus::new())))
    }

    fn context(kind: NodeKind, config: Value, variables: Value) -> NodeContext {
        NodeContext {
            execution_id: "exec-1".into(),
            node_id: "node-1".into(),
            kind,
            raw_config: config.clone(),
            config,
            variables: variables.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn glob_patterns() {
        assert!(glob_match("*", "report.csv"));
        assert!(glob_match("*.csv", "report.csv"));
        assert!(!glob_match("*.csv", "report.xlsx"));
        assert!(glob_match("rep*.c*v", "report.csv"));
        assert!(glob_match("report.csv", "report.csv"));
        assert!(!glob_match("a*a", "a"));
    }

    #[tokio::test]
    async fn lua_script_promotes_new_and_changed_globals() {
        let exec = executor();
        let mut ctx = context(
            NodeKind::Script,
            json!({ "script": "print('count is', count)\ncount = count + 1\ntotal = count * 10\nhelper = function() end" }),
            json!({ "count": 1, "untouched": "x" }),
        );

        let result = exec.execute_builtin(&mut ctx).await.unwrap();

        assert_eq!(result["status"], "completed");
        assert!(result["output"].as_str().unwrap().contains("count is\t1"));
        assert_eq!(ctx.variables["count"], json!(2));
        assert_eq!(ctx.variables["total"], json!(20));
        assert_eq!(ctx.variables["untouched"], json!("x"));
        assert!(ctx.variables.get("helper").is_none());
        assert!(ctx.variables.get("print").is_none());
    }

    #[tokio::test]
    async fn lua_runtime_error_is_reported_not_raised() {
        let exec = executor();
        let mut ctx = context(NodeKind::Script, json!({ "script": "error('boom')" }), json!({}));

        let result = exec.execute_builtin(&mut ctx).await.unwrap();
        assert_eq!(result["status"], "failed");
        assert!(result["error"].as_str().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn condition_writes_result_variable() {
        let exec = executor();
        let mut ctx = context(
            NodeKind::Condition,
            json!({ "condition": "${status} == ok", "result_variable": "is_ok" }),
            json!({ "status": "ok" }),
        );
        let result = exec.execute_builtin(&mut ctx).await.unwrap();
        assert_eq!(result["result"], json!(true));
        assert_eq!(ctx.variables["is_ok"], json!(true));
    }

    #[tokio::test]
    async fn log_node_emits_bus_event() {
        let bus = Arc::new(EventBus::new());
        let exec = NodeExecutor::new(Arc::clone(&bus));
        let mut rx = bus.subscribe();
        let mut ctx = context(NodeKind::Log, json!({ "level": "warn", "message": "hi" }), json!({}));

        exec.execute_builtin(&mut ctx).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "workflow.log");
        assert_eq!(event.data["message"], "hi");
        assert_eq!(event.data["level"], "warn");
    }

    #[tokio::test]
    async fn file_nodes_touch_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let exec = executor();

        let mut ctx = context(
            NodeKind::FileWrite,
            json!({ "file_path": format!("{}/out/a.csv", root), "content": "report" }),
            json!({ "report": "id,name\n1,x\n" }),
        );
        let result = exec.execute_builtin(&mut ctx).await.unwrap();
        assert_eq!(result["bytes_written"], json!(12));

        let mut ctx = context(
            NodeKind::FileMove,
            json!({ "source": format!("{}/out/a.csv", root), "destination": format!("{}/done/b.csv", root) }),
            json!({}),
        );
        exec.execute_builtin(&mut ctx).await.unwrap();

        let mut ctx = context(
            NodeKind::FileScan,
            json!({ "directory": format!("{}/done", root), "pattern": "*.csv" }),
            json!({}),
        );
        let result = exec.execute_builtin(&mut ctx).await.unwrap();
        assert_eq!(result["files_found"], json!(1));
        assert!(ctx.variables["file_list"][0].as_str().unwrap().ends_with("b.csv"));
    }

    #[tokio::test]
    async fn sqlite_connect_insert_query_close() {
        let exec = executor();
        let mut ctx = context(NodeKind::DatabaseConnect, json!({}), json!({}));
        exec.execute_builtin(&mut ctx).await.unwrap();
        assert_eq!(exec.open_connections().await, 1);
        let mut variables = ctx.variables.clone();

        for (kind, config) in [
            (NodeKind::DatabaseExecute, json!({ "query": "CREATE TABLE people (id INTEGER, name TEXT, score REAL)" })),
            (NodeKind::DatabaseBulkInsert, json!({ "table": "people", "data_source": "rows" })),
            (NodeKind::DatabaseQuery, json!({ "query": "SELECT id, name, score FROM people ORDER BY id" })),
        ] {
            variables.insert(
                "rows".into(),
                json!([{ "id": 1, "name": "ada", "score": 9.5 }, { "id": 2, "name": "bob", "score": null }]),
            );
            let mut ctx = context(kind, config, Value::Object(variables.clone()));
            exec.execute_builtin(&mut ctx).await.unwrap();
            variables = ctx.variables;
        }

        assert_eq!(
            variables["query_result"],
            json!([{ "id": 1, "name": "ada", "score": 9.5 }, { "id": 2, "name": "bob", "score": null }])
        );

        let mut ctx = context(NodeKind::DatabaseClose, json!({}), Value::Object(variables));
        exec.execute_builtin(&mut ctx).await.unwrap();
        assert!(ctx.variables.get("db_connection").is_none());
        assert_eq!(exec.open_connections().await, 0);
    }

    #[tokio::test]
    async fn custom_kind_is_not_a_builtin() {
        let exec = executor();
        let mut ctx = context(NodeKind::from("slack_notify"), json!({}), json!({}));
        let err = exec.execute_builtin(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("slack_notify"));
    }
}
