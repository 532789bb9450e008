//! Interactive product listing driven by stdin.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use vitrine::{
    application::{
        browse::BrowseSession,
        catalog::decode_products,
        patches::is_placeholder,
        search::{DebouncedSearch, SearchCommit, SearchSink},
    },
    cache::CacheEntry,
};

use crate::CliError;

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Quit,
    Next,
    Prev,
    Page(u32),
    Category(Option<String>),
    Delete(String),
    Help,
    Search(String),
}

fn parse_input(line: &str) -> Result<Input, String> {
    let Some(command) = line.trim().strip_prefix('/') else {
        return Ok(Input::Search(line.to_string()));
    };
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let argument = parts.next();
    match (name, argument) {
        ("quit" | "q", _) => Ok(Input::Quit),
        ("next" | "n", _) => Ok(Input::Next),
        ("prev" | "p", _) => Ok(Input::Prev),
        ("page", Some(page)) => page
            .parse()
            .map(Input::Page)
            .map_err(|_| format!("not a page number: {page}")),
        ("category", id) => Ok(Input::Category(id.map(str::to_string))),
        ("all", _) => Ok(Input::Category(None)),
        ("delete", Some(id)) => Ok(Input::Delete(id.to_string())),
        ("help" | "h", _) => Ok(Input::Help),
        _ => Err(format!("unknown command: /{command}")),
    }
}

const HELP: &str = "Type to search. Commands: /next /prev /page N /category [ID] /all /delete ID /quit";

/// Shows the listing once a search term settles.
struct ListingSink {
    session: Arc<BrowseSession>,
}

#[async_trait]
impl SearchSink for ListingSink {
    async fn commit(&self, commit: SearchCommit) {
        self.session.commit(commit).await;
        if let Some(entry) = self.session.current_entry() {
            print_listing(&self.session, &entry);
        }
    }
}

pub async fn run(session: Arc<BrowseSession>, quiet_period: Duration) -> Result<(), CliError> {
    let sink = Arc::new(ListingSink {
        session: Arc::clone(&session),
    });
    let search = DebouncedSearch::new(sink, quiet_period);

    println!("{HELP}");
    show(&session).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match parse_input(&line) {
            Ok(input) => input,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        match input {
            Input::Quit => break,
            Input::Help => println!("{HELP}"),
            Input::Search(text) => search.on_input(text),
            Input::Next => match session.next_page() {
                Some(_) => show(&session).await,
                None => println!("no more pages"),
            },
            Input::Prev => {
                session.prev_page();
                show(&session).await;
            }
            Input::Page(page) => {
                session.set_page(page);
                show(&session).await;
            }
            Input::Category(id) => {
                search.clear();
                session.select_category(id);
                show(&session).await;
            }
            Input::Delete(id) => {
                match session.catalog().delete_product(&id).await {
                    Ok(_) => println!("deleted {id}"),
                    Err(err) => println!("delete failed: {err}"),
                }
                if let Some(entry) = session.current_entry() {
                    print_listing(&session, &entry);
                }
            }
        }
    }

    session.close();
    Ok(())
}

async fn show(session: &BrowseSession) {
    let entry = session.show().await;
    print_listing(session, &entry);
}

fn print_listing(session: &BrowseSession, entry: &CacheEntry) {
    let products = match decode_products(entry) {
        Ok(products) => products,
        Err(err) => {
            warn!(cache_key = %entry.key, error = %err, "Listing unavailable");
            println!("error: {err}");
            return;
        }
    };

    let state = session.pagination();
    let pages = session
        .page_window()
        .iter()
        .map(|page| {
            if *page == state.page {
                format!("[{page}]")
            } else {
                page.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    println!(
        "-- {:?} | pages {pages}{} --",
        session.current_view(),
        if state.has_more { " ..." } else { "" }
    );
    if products.is_empty() {
        println!("(no products)");
    }
    for product in products {
        let id = if is_placeholder(&product.id) {
            "saving"
        } else {
            product.id.as_str()
        };
        println!("{id:>8}  {:<40}  {:>10.2}", product.name, product.price);
    }
}
