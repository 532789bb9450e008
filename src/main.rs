use std::{error::Error as StdError, process, sync::Arc};

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use vitrine::{
    application::{
        browse::BrowseSession,
        catalog::{Catalog, decode_categories, decode_entry, decode_products},
        error::CatalogError,
        search::SearchCommit,
    },
    config::{self, CreateArgs, LoadError, ProductsArgs, UpdateArgs},
    infra::{error::InfraError, runtime, telemetry},
};
use vitrine_api_types::{Product, ProductCreateRequest, ProductUpdateRequest};

mod browse_repl;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("failed to render output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("failed to read input: {0}")]
    Input(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_cli_error(&error);
        process::exit(1);
    }
}

fn report_cli_error(error: &CliError) {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }

    if dispatcher::has_been_set() {
        error!(error = %message, "command failed");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %message, "command failed");
    });
}

async fn run() -> Result<(), CliError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let command = cli_args.command.unwrap_or(config::Command::Browse);
    let catalog = runtime::build_catalog(&settings)?;

    match command {
        config::Command::Login { email } => run_login(&catalog, &email).await,
        config::Command::Categories => run_categories(&catalog).await,
        config::Command::Products(args) => {
            let session = runtime::browse_session(&settings, Arc::clone(&catalog));
            run_products(&session, args).await
        }
        config::Command::Product { slug } => run_product(&catalog, &slug).await,
        config::Command::Create(args) => run_create(&catalog, args).await,
        config::Command::Update(args) => run_update(&catalog, args).await,
        config::Command::Delete { id } => run_delete(&catalog, &id).await,
        config::Command::Browse => {
            let session = Arc::new(runtime::browse_session(&settings, catalog));
            browse_repl::run(session, settings.search.quiet_period).await
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}

async fn run_login(catalog: &Catalog, email: &str) -> Result<(), CliError> {
    catalog.authenticate(email).await?;
    println!("Signed in as {}", email.trim());
    Ok(())
}

async fn run_categories(catalog: &Catalog) -> Result<(), CliError> {
    let entry = catalog.categories().await;
    print_json(&decode_categories(&entry)?)
}

async fn run_products(session: &BrowseSession, args: ProductsArgs) -> Result<(), CliError> {
    session.select_category(args.category);
    if let Some(term) = args.search.map(|text| text.trim().to_string())
        && !term.is_empty()
    {
        session.apply_search(SearchCommit::Term(term));
    }
    session.set_page(args.page);

    let entry = session.show().await;
    let products = decode_products(&entry)?;
    info!(cache_key = %entry.key, count = products.len(), "Listed products");
    print_json(&json!({
        "pagination": session.pagination(),
        "pages": session.page_window(),
        "products": products,
    }))
}

async fn run_product(catalog: &Catalog, slug: &str) -> Result<(), CliError> {
    let entry = catalog.product(slug).await;
    let product: Option<Product> = decode_entry(&entry, "product")?;
    print_json(&product)
}

async fn run_create(catalog: &Catalog, args: CreateArgs) -> Result<(), CliError> {
    let CreateArgs {
        name,
        description,
        price,
        category_id,
        images,
    } = args;
    let request = ProductCreateRequest {
        name,
        description,
        price,
        category_id,
        images,
    };
    let product = catalog.create_product(request, &[]).await?;
    print_json(&product)
}

async fn run_update(catalog: &Catalog, args: UpdateArgs) -> Result<(), CliError> {
    let request = ProductUpdateRequest {
        name: args.name,
        description: args.description,
    };
    let product = catalog
        .update_product(&args.id, args.slug.as_deref(), request)
        .await?;
    print_json(&product)
}

async fn run_delete(catalog: &Catalog, id: &str) -> Result<(), CliError> {
    let success = catalog.delete_product(id).await?;
    print_json(&json!({ "id": id, "success": success }))
}
