//! mcpreg - command-line client for the MCP registry
//!
//! ## Commands
//!
//! - `model create|get|list`
//! - `context create|get|list`
//! - `protocol create|get|list`
//! - `execute`: start a protocol execution
//! - `status`: poll an execution
//! - `data add|get|list|delete`
//!
//! Results go to stdout (text, or the JSON payload with `--json`); logs and
//! errors go to stderr and a failure exits with status 1.

use std::future::Future;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use registry_core::facade::*;
use registry_core::{
    Context, DataRecord, Metadata, Model, ProtocolDef, Record, RegistryClient, DEFAULT_SERVER,
};
use serde::Serialize;
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "mcpreg")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Manage models, contexts, protocols and data in an MCP registry", long_about = None)]
struct Cli {
    /// Registry server address
    #[arg(long, global = true, env = "MCPREG_SERVER", default_value = DEFAULT_SERVER)]
    server: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print JSON payloads and JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage models
    Model {
        #[command(subcommand)]
        action: ModelCommand,
    },

    /// Manage contexts
    Context {
        #[command(subcommand)]
        action: ContextCommand,
    },

    /// Manage protocol definitions
    Protocol {
        #[command(subcommand)]
        action: ProtocolCommand,
    },

    /// Start a protocol execution
    Execute {
        /// Protocol (or model) ID
        protocol_id: String,
        context_id: String,
        /// Free-form input recorded with the execution
        input: String,
        /// JSON object of string parameters
        parameters: Option<String>,
    },

    /// Show the status of an execution
    Status { execution_id: String },

    /// Manage data records
    Data {
        #[command(subcommand)]
        action: DataCommand,
    },
}

#[derive(Args, Debug, Clone)]
struct PageArgs {
    /// Items per page (0 uses the server default)
    #[arg(long, default_value_t = 10)]
    page_size: u32,

    /// Resume after this token
    #[arg(long, default_value = "")]
    page_token: String,

    /// Follow page tokens until the listing is exhausted
    #[arg(long)]
    all: bool,
}

#[derive(Subcommand)]
enum ModelCommand {
    /// Register a model
    Create {
        name: String,
        #[arg(value_name = "TYPE")]
        model_type: String,
        /// JSON object of string parameters
        parameters: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Show one model
    Get { id: String },
    /// List models
    List {
        #[command(flatten)]
        page: PageArgs,
    },
}

#[derive(Subcommand)]
enum ContextCommand {
    /// Register a context
    Create {
        name: String,
        content: String,
        /// JSON object of string metadata
        metadata: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Associated model (repeatable)
        #[arg(long = "model-id")]
        model_ids: Vec<String>,
    },
    /// Show one context
    Get { id: String },
    /// List contexts
    List {
        #[command(flatten)]
        page: PageArgs,
    },
}

#[derive(Subcommand)]
enum ProtocolCommand {
    /// Register a protocol definition
    Create {
        name: String,
        #[arg(value_name = "TYPE")]
        protocol_type: String,
        /// Step name (repeatable, in order)
        #[arg(long = "step")]
        steps: Vec<String>,
        /// JSON object of string parameters
        #[arg(long)]
        parameters: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Show one protocol
    Get { id: String },
    /// List protocols
    List {
        #[command(flatten)]
        page: PageArgs,
    },
}

#[derive(Subcommand)]
enum DataCommand {
    /// Store a payload
    Add {
        #[arg(value_name = "TYPE")]
        data_type: String,
        content: String,
        /// JSON object of string metadata
        metadata: Option<String>,
    },
    /// Show one record
    Get { id: String },
    /// List records
    List {
        /// Only records of this type
        #[arg(long = "type")]
        data_type: Option<String>,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Remove a record
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    registry_core::init_tracing(cli.json, level);

    let client = RegistryClient::new(cli.server.clone())
        .with_context(|| format!("invalid server address {:?}", cli.server))?;
    debug!(server = %client.base_url(), "using registry");

    let output = run(&client, cli.command, cli.json).await?;
    if !output.is_empty() {
        println!("{}", output.trim_end());
    }
    Ok(())
}

async fn run(client: &RegistryClient, command: Commands, json: bool) -> Result<String> {
    match command {
        Commands::Model { action } => model_command(client, action, json).await,
        Commands::Context { action } => context_command(client, action, json).await,
        Commands::Protocol { action } => protocol_command(client, action, json).await,
        Commands::Execute {
            protocol_id,
            context_id,
            input,
            parameters,
        } => {
            let req = ExecuteProtocolRequest {
                protocol_id,
                context_id,
                input,
                parameters: parse_string_map(parameters.as_deref(), "parameters")?,
            };
            let resp = client.execute_protocol(&req).await?;
            render(json, &resp, |r| {
                format!("Protocol execution started: {} ({})", r.execution_id, r.status)
            })
        }
        Commands::Status { execution_id } => {
            let resp = client.get_protocol_status(&execution_id).await?;
            render(json, &resp, format_status)
        }
        Commands::Data { action } => data_command(client, action, json).await,
    }
}

async fn model_command(client: &RegistryClient, action: ModelCommand, json: bool) -> Result<String> {
    match action {
        ModelCommand::Create {
            name,
            model_type,
            parameters,
            description,
        } => {
            let req = CreateModelRequest {
                name,
                model_type,
                description,
                parameters: parse_string_map(parameters.as_deref(), "parameters")?,
            };
            let model = client.create_model(&req).await?;
            render(json, &model, |m| format!("Model created: {}", m.id))
        }
        ModelCommand::Get { id } => {
            let model = client.get_model(&id).await?;
            render(json, &model, format_model)
        }
        ModelCommand::List { page } => {
            let models = collect_pages(&page, |req| async move {
                let resp = client.list_models(&req).await?;
                Ok::<_, anyhow::Error>((resp.models, resp.next_page_token))
            })
            .await?;
            render(json, &models, |items| format_each(items, format_model))
        }
    }
}

async fn context_command(
    client: &RegistryClient,
    action: ContextCommand,
    json: bool,
) -> Result<String> {
    match action {
        ContextCommand::Create {
            name,
            content,
            metadata,
            description,
            model_ids,
        } => {
            let req = CreateContextRequest {
                name,
                content: Some(content),
                description,
                model_ids,
                metadata: parse_string_map(metadata.as_deref(), "metadata")?,
            };
            let context = client.create_context(&req).await?;
            render(json, &context, |c| format!("Context created: {}", c.id))
        }
        ContextCommand::Get { id } => {
            let context = client.get_context(&id).await?;
            render(json, &context, format_context)
        }
        ContextCommand::List { page } => {
            let contexts = collect_pages(&page, |req| async move {
                let resp = client.list_contexts(&req).await?;
                Ok::<_, anyhow::Error>((resp.contexts, resp.next_page_token))
            })
            .await?;
            render(json, &contexts, |items| format_each(items, format_context))
        }
    }
}

async fn protocol_command(
    client: &RegistryClient,
    action: ProtocolCommand,
    json: bool,
) -> Result<String> {
    match action {
        ProtocolCommand::Create {
            name,
            protocol_type,
            steps,
            parameters,
            description,
        } => {
            let req = CreateProtocolRequest {
                name,
                protocol_type,
                description,
                steps,
                parameters: parse_string_map(parameters.as_deref(), "parameters")?,
            };
            let protocol = client.create_protocol(&req).await?;
            render(json, &protocol, |p| format!("Protocol created: {}", p.id))
        }
        ProtocolCommand::Get { id } => {
            let protocol = client.get_protocol(&id).await?;
            render(json, &protocol, format_protocol)
        }
        ProtocolCommand::List { page } => {
            let protocols = collect_pages(&page, |req| async move {
                let resp = client.list_protocols(&req).await?;
                Ok::<_, anyhow::Error>((resp.protocols, resp.next_page_token))
            })
            .await?;
            render(json, &protocols, |items| format_each(items, format_protocol))
        }
    }
}

async fn data_command(client: &RegistryClient, action: DataCommand, json: bool) -> Result<String> {
    match action {
        DataCommand::Add {
            data_type,
            content,
            metadata,
        } => {
            let req = AddDataRequest {
                data_type,
                content: content.into_bytes(),
                metadata: parse_string_map(metadata.as_deref(), "metadata")?,
            };
            let data = client.add_data(&req).await?;
            render(json, &data, |d| format!("Data added: {}", d.id))
        }
        DataCommand::Get { id } => {
            let data = client.get_data(&id).await?;
            render(json, &data, format_data)
        }
        DataCommand::List { data_type, page } => {
            let data_type = data_type.unwrap_or_default();
            let data = collect_pages(&page, |req| {
                let data_type = data_type.clone();
                async move {
                    let resp = client
                        .list_data(&ListDataRequest {
                            data_type,
                            page_size: req.page_size,
                            page_token: req.page_token,
                        })
                        .await?;
                    Ok::<_, anyhow::Error>((resp.data, resp.next_page_token))
                }
            })
            .await?;
            render(json, &data, |items| format_each(items, format_data))
        }
        DataCommand::Delete { id } => {
            let resp = client.delete_data(&id).await?;
            render(json, &resp, |_| "Data deleted successfully".to_string())
        }
    }
}

/// Parse a JSON object whose values are all strings.
fn parse_string_map(raw: Option<&str>, what: &str) -> Result<Metadata> {
    match raw {
        None => Ok(Metadata::new()),
        Some(raw) if raw.trim().is_empty() => Ok(Metadata::new()),
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            anyhow::Error::new(registry_core::RegistryError::invalid_argument(format!(
                "invalid {what} JSON (expected an object of strings): {e}"
            )))
        }),
    }
}

/// Fetch one page, or every page with `--all`.
async fn collect_pages<T, F, Fut>(page: &PageArgs, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(ListRequest) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, String)>>,
{
    let mut items = Vec::new();
    let mut token = page.page_token.clone();
    loop {
        let (batch, next) = fetch(ListRequest::new(page.page_size, token)).await?;
        let exhausted = batch.is_empty() || next.is_empty();
        items.extend(batch);
        if !page.all || exhausted {
            if !page.all && !next.is_empty() {
                debug!(next_page_token = %next, "more results available");
            }
            break;
        }
        token = next;
    }
    Ok(items)
}

fn render<T, F>(json: bool, value: &T, text: F) -> Result<String>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    if json {
        serde_json::to_string_pretty(value).context("failed to encode output")
    } else {
        Ok(text(value))
    }
}

fn format_each<T>(items: &[T], format: fn(&T) -> String) -> String {
    if items.is_empty() {
        return "No results".to_string();
    }
    items.iter().map(format).collect::<Vec<_>>().join("\n")
}

fn format_map(map: &Metadata) -> String {
    if map.is_empty() {
        return "{}".to_string();
    }
    let pairs: Vec<String> = map.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{{{}}}", pairs.join(", "))
}

fn format_model(m: &Record<Model>) -> String {
    let mut out = format!(
        "ID: {}\nName: {}\nType: {}\nParameters: {}\n",
        m.id,
        m.body.name,
        m.body.model_type,
        format_map(&m.body.parameters)
    );
    if !m.body.description.is_empty() {
        out.push_str(&format!("Description: {}\n", m.body.description));
    }
    out
}

fn format_context(c: &Record<Context>) -> String {
    let mut out = format!("ID: {}\nName: {}\n", c.id, c.body.name);
    if let Some(content) = &c.body.content {
        out.push_str(&format!("Content: {content}\n"));
    }
    if let Some(description) = &c.body.description {
        out.push_str(&format!("Description: {description}\n"));
    }
    if !c.body.model_ids.is_empty() {
        out.push_str(&format!("Models: {}\n", c.body.model_ids.join(", ")));
    }
    out.push_str(&format!("Metadata: {}\n", format_map(&c.body.metadata)));
    out
}

fn format_protocol(p: &Record<ProtocolDef>) -> String {
    format!(
        "ID: {}\nName: {}\nType: {}\nSteps: {}\nParameters: {}\n",
        p.id,
        p.body.name,
        p.body.protocol_type,
        p.body.steps.join(" -> "),
        format_map(&p.body.parameters)
    )
}

fn format_data(d: &Record<DataRecord>) -> String {
    format!(
        "ID: {}\nType: {}\nContent: {}\nDigest: {}\nMetadata: {}\n",
        d.id,
        d.body.data_type,
        String::from_utf8_lossy(&d.body.content),
        d.body.content_digest,
        format_map(&d.body.metadata)
    )
}

fn format_status(s: &ProtocolStatusResponse) -> String {
    let mut out = format!("Status: {}\n", s.status);
    if !s.result.is_empty() {
        out.push_str(&format!("Result: {}\n", s.result));
    }
    out.push_str(&format!("Updated: {}\n", s.updated_at.to_rfc3339()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn string_maps_parse() {
        let map = parse_string_map(Some(r#"{"temperature":"0.2","top_p":"1"}"#), "parameters")
            .unwrap();
        assert_eq!(map.get("temperature").map(String::as_str), Some("0.2"));
        assert_eq!(map.len(), 2);

        assert!(parse_string_map(None, "metadata").unwrap().is_empty());
        assert!(parse_string_map(Some("  "), "metadata").unwrap().is_empty());
    }

    #[test]
    fn malformed_maps_are_invalid_arguments() {
        for raw in ["{not json", "[1,2]", r#"{"n": 1}"#, r#""text""#] {
            let err = parse_string_map(Some(raw), "metadata").unwrap_err();
            let registry_err = err
                .downcast_ref::<registry_core::RegistryError>()
                .expect("registry error");
            assert_eq!(
                registry_err.code(),
                registry_core::ErrorCode::InvalidArgument,
                "{raw}"
            );
        }
    }

    #[test]
    fn parses_nested_subcommands() {
        let cli = Cli::try_parse_from([
            "mcpreg",
            "--server",
            "localhost:6000",
            "model",
            "create",
            "gpt",
            "llm",
            r#"{"temperature":"0.2"}"#,
        ])
        .unwrap();
        assert_eq!(cli.server, "localhost:6000");
        match cli.command {
            Commands::Model {
                action:
                    ModelCommand::Create {
                        name,
                        model_type,
                        parameters,
                        ..
                    },
            } => {
                assert_eq!(name, "gpt");
                assert_eq!(model_type, "llm");
                assert!(parameters.is_some());
            }
            _ => panic!("expected model create"),
        }

        let cli = Cli::try_parse_from(["mcpreg", "data", "list", "--type", "text", "--all"]).unwrap();
        match cli.command {
            Commands::Data {
                action: DataCommand::List { data_type, page },
            } => {
                assert_eq!(data_type.as_deref(), Some("text"));
                assert!(page.all);
                assert_eq!(page.page_size, 10);
            }
            _ => panic!("expected data list"),
        }
    }

    #[tokio::test]
    async fn collect_pages_follows_tokens_only_with_all() {
        let pages = vec![
            (vec![1, 2], "t1".to_string()),
            (vec![3, 4], "t2".to_string()),
            (vec![], String::new()),
        ];

        let page = PageArgs {
            page_size: 2,
            page_token: String::new(),
            all: true,
        };
        let mut calls = 0;
        let all = collect_pages(&page, |_| {
            let result = pages[calls].clone();
            calls += 1;
            async move { Ok::<_, anyhow::Error>(result) }
        })
        .await
        .unwrap();
        assert_eq!(all, vec![1, 2, 3, 4]);
        assert_eq!(calls, 3);

        let single = PageArgs { all: false, ..page };
        let first = collect_pages(&single, |req| {
            assert_eq!(req.page_size, 2);
            let result = pages[0].clone();
            async move { Ok::<_, anyhow::Error>(result) }
        })
        .await
        .unwrap();
        assert_eq!(first, vec![1, 2]);
    }

    #[test]
    fn text_formatting() {
        let model = Record::new(
            Model::new("gpt", "llm").with_parameters(
                [("temperature".to_string(), "0.2".to_string())]
                    .into_iter()
                    .collect(),
            ),
        );
        let text = format_model(&model);
        assert!(text.contains("Name: gpt"));
        assert!(text.contains("Parameters: {temperature=0.2}"));

        let empty: Vec<Record<Model>> = Vec::new();
        assert_eq!(format_each(&empty, format_model), "No results");
    }
}
