//! In-memory portal used by the integration tests.
//!
//! Models just enough of the real screens for the navigator: a menu entry, a
//! search form, a result link and four tabs whose tables can span pages.
//! Element handles are plain numbers whose meaning is fixed below.

#![allow(dead_code)]

use async_trait::async_trait;
use harvester::config::{PortalLayout, TabLayout};
use harvester::{
    ElementRef, HarvestConfig, HarvestError, InstrumentRecord, PortalSession, Selector, Tab,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MENU: u64 = 1;
const SEARCH: u64 = 2;
const SUBMIT: u64 = 3;
const RESULT: u64 = 4;
const TAB_CONTROL: u64 = 10;
const TAB_CONTENT: u64 = 20;
const TAB_NEXT: u64 = 30;
const ROW: u64 = 100_000;
const CELL: u64 = 200_000;

pub type Pages = Vec<Vec<Vec<String>>>;

/// How a tab's "next page" control looks once there is nothing further
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LastPage {
    /// The control is not rendered
    #[default]
    Hidden,
    /// Rendered with the disabled state set
    Disabled,
    /// Rendered enabled but carrying a `disabled` class
    DisabledClass,
    /// Always rendered and enabled, and clicking it never changes the rows
    Stuck,
}

/// One instrument as the portal shows it
#[derive(Debug, Clone, Default)]
pub struct FakeInstrument {
    /// `None` renders the tab without its content container
    pub tabs: HashMap<Tab, Option<Pages>>,
    /// Tabs whose control is not on the page at all
    pub missing_controls: HashSet<Tab>,
    pub last_page: HashMap<Tab, LastPage>,
}

impl FakeInstrument {
    /// Every tab present with a single empty page
    pub fn empty() -> Self {
        let mut tabs = HashMap::new();
        for tab in Tab::SEQUENCE {
            tabs.insert(tab, Some(vec![vec![]]));
        }
        Self {
            tabs,
            ..Self::default()
        }
    }

    pub fn with_tab(mut self, tab: Tab, pages: Pages) -> Self {
        self.tabs.insert(tab, Some(pages));
        self
    }

    pub fn without_content(mut self, tab: Tab) -> Self {
        self.tabs.insert(tab, None);
        self
    }

    pub fn without_control(mut self, tab: Tab) -> Self {
        self.missing_controls.insert(tab);
        self
    }

    pub fn with_last_page(mut self, tab: Tab, style: LastPage) -> Self {
        self.last_page.insert(tab, style);
        self
    }
}

#[derive(Debug, Default)]
struct PageState {
    search_value: String,
    submitted: Option<String>,
    opened: Option<String>,
    active_tab: Option<Tab>,
    page: usize,
    dead: bool,
}

#[derive(Default)]
pub struct FakePortal {
    instruments: HashMap<String, FakeInstrument>,
    /// Opening this instrument kills the session
    crash_on: Option<String>,
    state: Mutex<PageState>,
    visits: Mutex<Vec<String>>,
    next_clicks: Mutex<usize>,
}

impl FakePortal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instrument(mut self, id: &str, instrument: FakeInstrument) -> Self {
        self.instruments.insert(id.to_string(), instrument);
        self
    }

    pub fn crash_on(mut self, id: &str) -> Self {
        self.crash_on = Some(id.to_string());
        self
    }

    pub fn into_session(self) -> Arc<FakePortal> {
        Arc::new(self)
    }

    /// Instruments whose page was opened, in order
    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }

    /// Clicks on any "next page" control so far
    pub fn next_clicks(&self) -> usize {
        *self.next_clicks.lock().unwrap()
    }

    fn current_rows(&self, state: &PageState) -> Vec<Vec<String>> {
        let Some(id) = &state.opened else {
            return Vec::new();
        };
        let Some(tab) = state.active_tab else {
            return Vec::new();
        };
        self.instruments
            .get(id)
            .and_then(|i| i.tabs.get(&tab))
            .and_then(|t| t.as_ref())
            .and_then(|pages| pages.get(state.page))
            .cloned()
            .unwrap_or_default()
    }

    fn page_count(&self, state: &PageState, tab: Tab) -> Option<usize> {
        let id = state.opened.as_ref()?;
        let pages = self.instruments.get(id)?.tabs.get(&tab)?.as_ref()?;
        Some(pages.len())
    }

    fn last_page_style(&self, state: &PageState, tab: Tab) -> LastPage {
        state
            .opened
            .as_ref()
            .and_then(|id| self.instruments.get(id))
            .and_then(|i| i.last_page.get(&tab).copied())
            .unwrap_or_default()
    }

    fn has_more(&self, state: &PageState, tab: Tab) -> bool {
        self.page_count(state, tab)
            .is_some_and(|n| state.page + 1 < n)
    }

    /// Tab behind a next-page handle
    fn next_tab(element: ElementRef) -> Option<Tab> {
        (TAB_NEXT..TAB_NEXT + 4)
            .contains(&element.0)
            .then(|| Tab::SEQUENCE[(element.0 - TAB_NEXT) as usize])
    }

    fn find_id(&self, state: &PageState, name: &str) -> Vec<u64> {
        match name {
            "menu" => vec![MENU],
            "search" => vec![SEARCH],
            "submit" => vec![SUBMIT],
            "result" => match (&state.submitted, &state.opened) {
                (Some(id), None) if self.instruments.contains_key(id) => vec![RESULT],
                _ => vec![],
            },
            _ => {
                for (idx, tab) in Tab::SEQUENCE.iter().enumerate() {
                    let idx = idx as u64;
                    let slug = slug(*tab);
                    let Some(id) = &state.opened else {
                        return vec![];
                    };
                    let instrument = &self.instruments[id];
                    if name == format!("tab-{slug}") {
                        return if instrument.missing_controls.contains(tab) {
                            vec![]
                        } else {
                            vec![TAB_CONTROL + idx]
                        };
                    }
                    let active = state.active_tab == Some(*tab);
                    if name == format!("content-{slug}") {
                        return if active && self.page_count(state, *tab).is_some() {
                            vec![TAB_CONTENT + idx]
                        } else {
                            vec![]
                        };
                    }
                    if name == format!("next-{slug}") {
                        let shown = self.has_more(state, *tab)
                            || self.last_page_style(state, *tab) != LastPage::Hidden;
                        return if active && shown {
                            vec![TAB_NEXT + idx]
                        } else {
                            vec![]
                        };
                    }
                }
                vec![]
            }
        }
    }
}

pub fn slug(tab: Tab) -> &'static str {
    match tab {
        Tab::Adjustments => "adjustments",
        Tab::AdjustmentTerm => "adjustment-term",
        Tab::Attachments => "attachments",
        Tab::Clarifications => "clarifications",
    }
}

fn dead() -> HarvestError {
    HarvestError::SessionFailure("browser went away".to_string())
}

#[async_trait]
impl PortalSession for FakePortal {
    async fn find_elements(
        &self,
        selector: &Selector,
        root: Option<ElementRef>,
    ) -> Result<Vec<ElementRef>, HarvestError> {
        let state = self.state.lock().unwrap();
        if state.dead {
            return Err(dead());
        }
        let found = match (selector, root) {
            (Selector::Id(name), None) => self.find_id(&state, name),
            (Selector::Css(css), Some(ElementRef(r))) if css == "tr" && r >= TAB_CONTENT && r < TAB_NEXT => {
                (0..self.current_rows(&state).len() as u64)
                    .map(|i| ROW + i)
                    .collect()
            }
            (Selector::Css(css), Some(ElementRef(r))) if css == "td" && (ROW..CELL).contains(&r) => {
                let row = (r - ROW) as usize;
                let width = self.current_rows(&state).get(row).map_or(0, Vec::len) as u64;
                (0..width).map(|c| CELL + (r - ROW) * 100 + c).collect()
            }
            _ => vec![],
        };
        Ok(found.into_iter().map(ElementRef).collect())
    }

    async fn click(&self, element: ElementRef) -> Result<(), HarvestError> {
        let mut state = self.state.lock().unwrap();
        if state.dead {
            return Err(dead());
        }
        match element.0 {
            MENU => {
                state.submitted = None;
                state.opened = None;
                state.active_tab = None;
            }
            SUBMIT => state.submitted = Some(state.search_value.clone()),
            RESULT => {
                let id = state.submitted.clone().unwrap_or_default();
                if self.crash_on.as_deref() == Some(id.as_str()) {
                    state.dead = true;
                    return Err(dead());
                }
                self.visits.lock().unwrap().push(id.clone());
                state.opened = Some(id);
            }
            n if (TAB_CONTROL..TAB_CONTENT).contains(&n) => {
                state.active_tab = Some(Tab::SEQUENCE[(n - TAB_CONTROL) as usize]);
                state.page = 0;
            }
            n if (TAB_NEXT..TAB_NEXT + 4).contains(&n) => {
                *self.next_clicks.lock().unwrap() += 1;
                let tab = Tab::SEQUENCE[(n - TAB_NEXT) as usize];
                let stuck = self.last_page_style(&state, tab) == LastPage::Stuck;
                if !stuck && self.has_more(&state, tab) {
                    state.page += 1;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn text(&self, element: ElementRef) -> Result<String, HarvestError> {
        let state = self.state.lock().unwrap();
        if state.dead {
            return Err(dead());
        }
        if element.0 < CELL {
            return Ok(String::new());
        }
        let offset = element.0 - CELL;
        let (row, col) = ((offset / 100) as usize, (offset % 100) as usize);
        Ok(self
            .current_rows(&state)
            .get(row)
            .and_then(|r| r.get(col))
            .map(|c| c.trim().to_string())
            .unwrap_or_default())
    }

    async fn set_value(&self, element: ElementRef, value: &str) -> Result<(), HarvestError> {
        let mut state = self.state.lock().unwrap();
        if state.dead {
            return Err(dead());
        }
        if element.0 == SEARCH {
            state.search_value = value.to_string();
        }
        Ok(())
    }

    async fn is_enabled(&self, element: ElementRef) -> Result<bool, HarvestError> {
        let state = self.state.lock().unwrap();
        if state.dead {
            return Err(dead());
        }
        Ok(match Self::next_tab(element) {
            Some(tab) => {
                self.has_more(&state, tab)
                    || self.last_page_style(&state, tab) != LastPage::Disabled
            }
            None => true,
        })
    }

    async fn attribute(
        &self,
        element: ElementRef,
        name: &str,
    ) -> Result<Option<String>, HarvestError> {
        let state = self.state.lock().unwrap();
        if state.dead {
            return Err(dead());
        }
        let Some(tab) = Self::next_tab(element) else {
            return Ok(None);
        };
        if name != "class" {
            return Ok(None);
        }
        let class = if !self.has_more(&state, tab)
            && self.last_page_style(&state, tab) == LastPage::DisabledClass
        {
            "pager-next disabled"
        } else {
            "pager-next"
        };
        Ok(Some(class.to_string()))
    }

    async fn current_url(&self) -> Result<String, HarvestError> {
        Ok("https://portal.test/home".to_string())
    }
}

fn tab_layout(tab: Tab) -> TabLayout {
    let slug = slug(tab);
    TabLayout {
        control: Selector::Id(format!("tab-{slug}")),
        content: Selector::Id(format!("content-{slug}")),
        rows: Selector::Css("tr".to_string()),
        next_page: Some(Selector::Id(format!("next-{slug}"))),
    }
}

pub fn layout() -> PortalLayout {
    PortalLayout {
        menu_path: vec![Selector::Id("menu".to_string())],
        search_input: Selector::Id("search".to_string()),
        search_submit: Selector::Id("submit".to_string()),
        result_link: Selector::Id("result".to_string()),
        adjustments: tab_layout(Tab::Adjustments),
        adjustment_term: tab_layout(Tab::AdjustmentTerm),
        attachments: tab_layout(Tab::Attachments),
        clarifications: tab_layout(Tab::Clarifications),
        ..PortalLayout::default()
    }
}

/// Config with short waits and every file inside `dir`
pub fn config(dir: &Path) -> HarvestConfig {
    HarvestConfig {
        input_path: dir.join("input.csv"),
        output_path: dir.join("output.csv"),
        checkpoint_path: dir.join("checkpoint.json"),
        passthrough_columns: vec!["Técnico".to_string()],
        wait_timeout: Duration::from_millis(60),
        poll_interval: Duration::from_millis(10),
        search_timeout: Duration::from_millis(60),
        layout: layout(),
        ..HarvestConfig::default()
    }
}

pub fn record(id: &str, line: usize) -> InstrumentRecord {
    let mut row = BTreeMap::new();
    row.insert("Instrumento nº".to_string(), id.to_string());
    row.insert("Técnico".to_string(), format!("tech-{id}"));
    InstrumentRecord::new(id, row, line)
}

pub fn records(ids: &[&str]) -> Vec<InstrumentRecord> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| record(id, i + 2))
        .collect()
}

/// Row for the adjustments table: number in column 0, status in column 4
pub fn adjustment_row(number: &str, status: &str) -> Vec<String> {
    vec![number.into(), "".into(), "".into(), "".into(), status.into()]
}

/// Row for the adjustment-term table: date in column 2, status in column 4
pub fn term_row(date: &str, status: &str) -> Vec<String> {
    vec!["TA".into(), "".into(), date.into(), "".into(), status.into()]
}

/// Row for the attachments table: upload date in column 3
pub fn attachment_row(date: &str) -> Vec<String> {
    vec!["doc.pdf".into(), "".into(), "".into(), date.into()]
}

/// Row for the clarifications table: status in column 3
pub fn clarification_row(status: &str) -> Vec<String> {
    vec!["1".into(), "".into(), "".into(), status.into()]
}

/// Output sheet as header-keyed rows
pub fn output_rows(path: &Path) -> Vec<BTreeMap<String, String>> {
    if !path.exists() {
        return Vec::new();
    }
    let table = harvester::sheets::read_table(path).unwrap();
    table
        .rows
        .iter()
        .map(|row| {
            table
                .headers
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect()
        })
        .collect()
}
