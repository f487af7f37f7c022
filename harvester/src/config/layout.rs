use crate::extract::Tab;
use crate::Selector;
use serde::{Deserialize, Serialize};

/// Where one tab lives on the instrument screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabLayout {
    /// Control that opens the tab
    pub control: Selector,
    /// Container that only exists once the tab has rendered data
    pub content: Selector,
    /// Data rows, searched inside `content`
    pub rows: Selector,
    /// Pagination control, searched on the whole page
    #[serde(default)]
    pub next_page: Option<Selector>,
}

/// Column positions (0-based) of the cells the extractors read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnLayout {
    pub adjustment_number: usize,
    pub adjustment_status: usize,
    pub term_request_date: usize,
    pub term_status: usize,
    pub attachment_upload_date: usize,
    pub clarification_status: usize,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            adjustment_number: 0,
            adjustment_status: 4,
            term_request_date: 2,
            term_status: 4,
            attachment_upload_date: 3,
            clarification_status: 3,
        }
    }
}

/// The portal's fixed page structure.
///
/// Built for one portal and expected to break when its markup changes; every
/// selector can be overridden from the config file when that happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalLayout {
    /// Clicked in order to reach the search screen from anywhere in the portal
    pub menu_path: Vec<Selector>,
    pub search_input: Selector,
    pub search_submit: Selector,
    /// First search hit; its presence is the "found" marker and it is followed
    pub result_link: Selector,
    pub adjustments: TabLayout,
    pub adjustment_term: TabLayout,
    pub attachments: TabLayout,
    pub clarifications: TabLayout,
    pub columns: ColumnLayout,
    /// Status fragments that mark a clarification as still unanswered
    pub pending_markers: Vec<String>,
}

impl PortalLayout {
    pub fn tab(&self, tab: Tab) -> &TabLayout {
        match tab {
            Tab::Adjustments => &self.adjustments,
            Tab::AdjustmentTerm => &self.adjustment_term,
            Tab::Attachments => &self.attachments,
            Tab::Clarifications => &self.clarifications,
        }
    }

    /// Every selector in the layout, for validation
    pub(crate) fn selectors(&self) -> Vec<&Selector> {
        let mut all: Vec<&Selector> = self.menu_path.iter().collect();
        all.extend([&self.search_input, &self.search_submit, &self.result_link]);
        for tab in Tab::SEQUENCE {
            let t = self.tab(tab);
            all.extend([&t.control, &t.content, &t.rows]);
            all.extend(t.next_page.as_ref());
        }
        all
    }
}

fn next_page() -> Option<Selector> {
    Some(Selector::from(
        "xpath://div[contains(@class,'pagination')]//a[contains(normalize-space(.),'Próxima')]",
    ))
}

impl Default for PortalLayout {
    fn default() -> Self {
        Self {
            menu_path: vec![
                Selector::from("/html/body/div[1]/div[3]/div[1]/div[1]/div[1]/div[4]"),
                Selector::from("/html[1]/body[1]/div[1]/div[3]/div[2]/div[1]/div[1]/ul[1]/li[6]/a[1]"),
            ],
            search_input: Selector::from(
                "/html[1]/body[1]/div[3]/div[15]/div[3]/div[1]/div[1]/form[1]/table[1]/tbody[1]/tr[2]/td[2]/input[1]",
            ),
            search_submit: Selector::from(
                "/html[1]/body[1]/div[3]/div[15]/div[3]/div[1]/div[1]/form[1]/table[1]/tbody[1]/tr[2]/td[2]/span[1]/input[1]",
            ),
            result_link: Selector::from(
                "/html[1]/body[1]/div[3]/div[15]/div[3]/div[3]/table[1]/tbody[1]/tr[1]/td[1]/div[1]/a[1]",
            ),
            adjustments: TabLayout {
                control: Selector::from("xpath://div[@id='menuInterno']//a[normalize-space(.)='Ajustes do PT']"),
                content: Selector::from("css:#listaAjustesPlanoTrabalho"),
                rows: Selector::from("css:tbody > tr"),
                next_page: next_page(),
            },
            adjustment_term: TabLayout {
                control: Selector::from("xpath://div[@id='menuInterno']//a[normalize-space(.)='TA']"),
                content: Selector::from("css:#listaSolicitacoesTermoAditivo"),
                rows: Selector::from("css:tbody > tr"),
                next_page: next_page(),
            },
            attachments: TabLayout {
                control: Selector::from("xpath://div[@id='menuInterno']//a[normalize-space(.)='Anexos']"),
                content: Selector::from("css:#listaAnexos"),
                rows: Selector::from("css:tbody > tr"),
                next_page: next_page(),
            },
            clarifications: TabLayout {
                control: Selector::from("xpath://div[@id='menuInterno']//a[normalize-space(.)='Esclarecimentos']"),
                content: Selector::from("css:#listaEsclarecimentos"),
                rows: Selector::from("css:tbody > tr"),
                next_page: next_page(),
            },
            columns: ColumnLayout::default(),
            pending_markers: vec![
                "Aguardando Resposta".to_string(),
                "Pendente".to_string(),
            ],
        }
    }
}
