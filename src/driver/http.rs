//! HTTP fallback driver.
//!
//! Serves sources that render server-side: fetches documents with
//! `reqwest`, parses them with `scraper`, and emulates clicking by
//! following anchor hrefs within the current document. Clicking anything
//! that is not an anchor is `Unsupported`, which surfaces sources that
//! genuinely need the CDP backend.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::{DriverError, PageDriver, SessionFactory, TableRow};

/// Page driver over plain HTTP. Holds the current document as a string;
/// parsing happens per operation because parsed documents are not `Send`.
pub struct HttpDriver {
    client: reqwest::Client,
    current_url: Option<Url>,
    document: Option<String>,
}

impl HttpDriver {
    pub fn new(timeout: Duration) -> Result<Self, DriverError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| DriverError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            current_url: None,
            document: None,
        })
    }

    fn document(&self, selector: &str) -> Result<&str, DriverError> {
        self.document
            .as_deref()
            .ok_or_else(|| DriverError::NotFound(selector.to_string()))
    }
}

#[async_trait]
impl PageDriver for HttpDriver {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        let parsed = Url::parse(url).map_err(|e| DriverError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let response = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| DriverError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        let final_url = response.url().clone();
        let body = response.text().await.map_err(|e| DriverError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        debug!(url = %final_url, bytes = body.len(), "fetched document");
        self.current_url = Some(final_url);
        self.document = Some(body);
        Ok(())
    }

    async fn read_table_rows(&mut self, selector: &str) -> Result<Vec<TableRow>, DriverError> {
        extract_table_rows(self.document(selector)?, selector)
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        let href = find_anchor_href(self.document(selector)?, selector)?;
        let target = match &self.current_url {
            Some(base) => base.join(&href).map_err(|e| DriverError::Navigation {
                url: href.clone(),
                message: e.to_string(),
            })?,
            None => Url::parse(&href).map_err(|e| DriverError::Navigation {
                url: href.clone(),
                message: e.to_string(),
            })?,
        };
        self.goto(target.as_str()).await
    }

    async fn element_present(&mut self, selector: &str) -> Result<bool, DriverError> {
        match self.document.as_deref() {
            Some(doc) => element_present_in(doc, selector),
            None => Ok(false),
        }
    }

    async fn read_text(&mut self, selector: &str) -> Result<Option<String>, DriverError> {
        match self.document.as_deref() {
            Some(doc) => first_element_text(doc, selector),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.current_url = None;
        self.document = None;
    }
}

fn parse_selector(selector: &str) -> Result<Selector, DriverError> {
    Selector::parse(selector).map_err(|_| DriverError::Selector(selector.to_string()))
}

fn extract_table_rows(document: &str, table_selector: &str) -> Result<Vec<TableRow>, DriverError> {
    let table_sel = parse_selector(table_selector)?;
    let row_sel = parse_selector("tr")?;
    let cell_sel = parse_selector("td, th")?;

    let doc = Html::parse_document(document);
    let table = doc
        .select(&table_sel)
        .next()
        .ok_or_else(|| DriverError::NotFound(table_selector.to_string()))?;

    let mut rows = Vec::new();
    for row in table.select(&row_sel) {
        let mut text = Vec::new();
        let mut html = Vec::new();
        for cell in row.select(&cell_sel) {
            text.push(collapse_whitespace(&cell.text().collect::<String>()));
            html.push(cell.inner_html());
        }
        if !text.is_empty() {
            rows.push(TableRow { text, html });
        }
    }
    Ok(rows)
}

fn find_anchor_href(document: &str, selector: &str) -> Result<String, DriverError> {
    let sel = parse_selector(selector)?;
    let doc = Html::parse_document(document);
    let element = doc
        .select(&sel)
        .next()
        .ok_or_else(|| DriverError::NotFound(selector.to_string()))?;
    if element.value().name() != "a" {
        return Err(DriverError::Unsupported(format!(
            "click on non-anchor <{}> ({selector})",
            element.value().name()
        )));
    }
    element
        .value()
        .attr("href")
        .map(str::to_string)
        .ok_or_else(|| DriverError::Unsupported(format!("anchor without href ({selector})")))
}

fn element_present_in(document: &str, selector: &str) -> Result<bool, DriverError> {
    let sel = parse_selector(selector)?;
    let doc = Html::parse_document(document);
    Ok(doc.select(&sel).next().is_some())
}

fn first_element_text(document: &str, selector: &str) -> Result<Option<String>, DriverError> {
    let sel = parse_selector(selector)?;
    let doc = Html::parse_document(document);
    Ok(doc
        .select(&sel)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>())))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Factory for the HTTP fallback backend.
pub struct HttpSessionFactory {
    timeout: Duration,
}

impl HttpSessionFactory {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpSessionFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn create(&self) -> anyhow::Result<Box<dyn PageDriver>> {
        Ok(Box::new(HttpDriver::new(self.timeout)?))
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
        <span class="page">Page 3 of 12</span>
        <table id="results">
          <tr><th>Place</th><th>Time</th><th>AG</th></tr>
          <tr><td> 42 </td><td>3:15:00</td><td>M35</td></tr>
          <tr><td>43</td><td>3:15:04</td><td><img alt="GER" src="f.png"></td></tr>
        </table>
        <a class="next" href="?page=4">next</a>
        <button class="refresh">refresh</button>
        </body></html>
    "#;

    #[test]
    fn table_rows_carry_text_and_html() {
        let rows = extract_table_rows(PAGE, "table#results").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].text, vec!["42", "3:15:00", "M35"]);
        assert!(rows[2].html[2].contains(r#"alt="GER""#));
        assert_eq!(rows[2].text[2], "");
    }

    #[test]
    fn missing_table_is_not_found() {
        assert!(matches!(
            extract_table_rows(PAGE, "table#other"),
            Err(DriverError::NotFound(_))
        ));
    }

    #[test]
    fn anchor_href_resolves() {
        assert_eq!(find_anchor_href(PAGE, "a.next").unwrap(), "?page=4");
    }

    #[test]
    fn non_anchor_click_is_unsupported() {
        assert!(matches!(
            find_anchor_href(PAGE, "button.refresh"),
            Err(DriverError::Unsupported(_))
        ));
    }

    #[test]
    fn indicator_text_collapses_whitespace() {
        let text = first_element_text(PAGE, "span.page").unwrap();
        assert_eq!(text.as_deref(), Some("Page 3 of 12"));
    }

    #[tokio::test]
    async fn element_present_without_document_is_false() {
        let mut driver = HttpDriver::new(Duration::from_secs(5)).unwrap();
        assert!(!driver.element_present("a.next").await.unwrap());
        assert_eq!(driver.read_text("span.page").await.unwrap(), None);
    }
}
