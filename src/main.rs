use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use qna::api::{AuthApi, Filters, QueryService, RequestClient, SortCriterion};
use qna::config::Config;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "qna")]
#[command(about = "Command-line client for the Q&A platform query API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/qna/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Platform base URL, overriding the config file
  #[arg(long)]
  base_url: Option<String>,

  /// Tenant identifier sent with every request
  #[arg(long)]
  tenant: Option<String>,

  /// Serve canned data instead of calling the server
  #[arg(long)]
  mock: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run a named query and print the page as JSON
  Search {
    /// Query name, e.g. prompt.searchDetailed
    query: String,

    /// Filter as key=value; repeat a key to build a list
    #[arg(short, long = "filter", value_parser = parse_filter)]
    filters: Vec<(String, Value)>,

    #[arg(long, default_value_t = 1)]
    page: u32,

    #[arg(long, default_value_t = 20)]
    page_size: u32,

    /// Sort as field[:asc|desc]; repeatable
    #[arg(short, long)]
    sort: Vec<SortCriterion>,
  },
  /// Show the user the current session belongs to
  Whoami,
  /// End the current session
  Logout,
}

/// Values that parse as JSON keep their type; anything else is a string.
fn parse_filter(raw: &str) -> Result<(String, Value), String> {
  let (key, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected key=value, got {:?}", raw))?;
  let key = key.trim();
  if key.is_empty() {
    return Err(format!("filter name missing in {:?}", raw));
  }
  let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
  Ok((key.to_string(), value))
}

fn collect_filters(pairs: Vec<(String, Value)>) -> Filters {
  let mut filters = Filters::new();
  for (key, value) in pairs {
    match filters.get_mut(&key) {
      Some(Value::Array(items)) => items.push(value),
      Some(existing) => {
        let first = existing.take();
        *existing = Value::Array(vec![first, value]);
      }
      None => {
        filters.insert(key, value);
      }
    }
  }
  filters
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = qna::logging::init()?;

  let mut config = Config::load(args.config.as_deref())?;
  if let Some(base_url) = args.base_url {
    config.base_url = Some(base_url);
  }
  if let Some(tenant) = args.tenant {
    config.tenant_id = tenant;
  }
  config.mock_mode |= args.mock;

  let client = RequestClient::new(&config)?;
  let queries = QueryService::new(&config, client.clone());
  let auth = AuthApi::new(client, queries.cache().clone(), config.mock_mode);

  match args.command {
    Command::Search {
      query,
      filters,
      page,
      page_size,
      sort,
    } => {
      let filters = collect_filters(filters);
      let sort = (!sort.is_empty()).then_some(sort.as_slice());
      let result = queries.search(&query, &filters, page, page_size, sort).await?;
      println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Command::Whoami => match auth.me().await? {
      Some(user) => println!("{}", user),
      None => return Err(eyre!("not logged in")),
    },
    Command::Logout => {
      auth.logout().await?;
      println!("logged out");
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_filter_values() {
    assert_eq!(parse_filter("q=rust").unwrap(), ("q".to_string(), json!("rust")));
    assert_eq!(parse_filter("minScore=3").unwrap(), ("minScore".to_string(), json!(3)));
    assert_eq!(parse_filter("url=a=b").unwrap().1, json!("a=b"));
    assert!(parse_filter("nothing").is_err());
    assert!(parse_filter("=x").is_err());
  }

  #[test]
  fn test_repeated_filters_become_list() {
    let filters = collect_filters(vec![
      ("tags".to_string(), json!("python")),
      ("tags".to_string(), json!("llm")),
      ("tags".to_string(), json!("rust")),
      ("q".to_string(), json!("x")),
    ]);
    assert_eq!(Value::Object(filters), json!({ "tags": ["python", "llm", "rust"], "q": "x" }));
  }
}
