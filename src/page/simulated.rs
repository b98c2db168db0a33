//! A configurator page simulated from a JSON fixture.
//!
//! `SimulatedDevice` implements both [`Page`] and [`ViewportCapture`]: it
//! renders the navigation bar, the active panel and a bottom status bar into
//! a [`MockFramebuffer`], and reacts to clicks, select changes, scrolling and
//! console input the way the real application does, including clamped
//! scrolling, re-renders that invalidate handles, silently rejected profile
//! switches and console output that streams in over several reads.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use super::dom::{
    DomBuilder, DomSnapshot, ElementHandle, ElementNode, NodeId, Positioning, Rect, ScrollMetrics, Viewport,
};
use super::{Key, Page, PageError, PageResult};
use crate::snapshot::backend::{MockFramebuffer, ViewportCapture};
use crate::snapshot::types::{SnapshotError, SnapshotResult};
use crate::snapshot::utils::to_data_url;

const BACKGROUND: [u8; 3] = [24, 24, 24];
const HEADER: [u8; 3] = [40, 44, 52];
const STATUS_BAR: [u8; 3] = [255, 187, 0];
const TEXT: [u8; 3] = [230, 230, 230];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportFixture {
    /// Logical (CSS) pixels
    pub width: f64,
    pub height: f64,
    /// Physical pixels per logical pixel
    pub scale: f64,
    /// Navigation bar above the content region
    pub header_height: f64,
    /// 0 for no status bar
    pub status_bar_height: f64,
}

impl Default for ViewportFixture {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 500.0,
            scale: 1.0,
            header_height: 100.0,
            status_bar_height: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubPanelFixture {
    /// Structural class, e.g. `subtab-pid`
    pub class: String,
    #[serde(default)]
    pub content_height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelFixture {
    pub class: String,
    #[serde(default)]
    pub label: String,
    /// Logical height of the panel content; at most the region height means no scrolling
    #[serde(default)]
    pub content_height: f64,
    #[serde(default)]
    pub subpanels: Vec<SubPanelFixture>,
}

impl PanelFixture {
    pub fn new(class: impl Into<String>, content_height: f64) -> Self {
        let class = class.into();
        Self {
            label: class.trim_start_matches("tab_").to_string(),
            class,
            content_height,
            subpanels: Vec::new(),
        }
    }

    pub fn subpanel(mut self, class: impl Into<String>, content_height: f64) -> Self {
        self.subpanels.push(SubPanelFixture {
            class: class.into(),
            content_height,
        });
        self
    }
}

/// How the profile selects are marked up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMarkup {
    /// `name=profile` / `name=rate_profile`
    #[default]
    Named,
    /// Bare selects, only their position tells them apart
    Anonymous,
}

/// What the device does with the next profile switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchFault {
    Accept,
    /// Ignored without an error, the select keeps its old value
    Reject,
    /// The page script throws
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantFixture {
    /// Panel that carries the profile selects
    pub panel: String,
    pub markup: ControlMarkup,
    pub primary: Vec<String>,
    pub primary_active: String,
    /// Empty for no secondary select
    pub secondary: Vec<String>,
    pub secondary_active: String,
    /// Consumed one per switch; `Accept` once empty
    pub faults: Vec<SwitchFault>,
}

impl Default for VariantFixture {
    fn default() -> Self {
        Self {
            panel: "tab_pid_tuning".to_string(),
            markup: ControlMarkup::Named,
            primary: vec!["0".into(), "1".into(), "2".into()],
            primary_active: "0".to_string(),
            secondary: vec!["0".into(), "1".into()],
            secondary_active: "0".to_string(),
            faults: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleBackend {
    /// Terminal emulator exposing its command API
    #[default]
    Widget,
    /// Terminal emulator reachable only through key events
    Keystrokes,
    /// Plain text input
    PlainInput,
    /// No input surface at all
    Absent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleFixture {
    pub panel: String,
    pub backend: ConsoleBackend,
    /// Output per command
    pub responses: BTreeMap<String, String>,
    /// Characters revealed per console read
    pub chunk_size: usize,
}

impl Default for ConsoleFixture {
    fn default() -> Self {
        Self {
            panel: "tab_cli".to_string(),
            backend: ConsoleBackend::Widget,
            responses: BTreeMap::new(),
            chunk_size: 256,
        }
    }
}

/// Everything the simulated configurator needs to know
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFixture {
    pub viewport: ViewportFixture,
    pub panels: Vec<PanelFixture>,
    pub variants: VariantFixture,
    pub console: ConsoleFixture,
    /// `None` when the page has no expert mode toggle
    pub expert_mode: Option<bool>,
    pub connected: bool,
    /// Connection drops once this many panels were opened
    pub disconnect_after_navigations: Option<usize>,
    /// Inspections before the navigation bar shows up
    pub initializing_inspections: u32,
    /// Leading viewport captures that fail
    pub capture_failures: u32,
    /// Every capture from this 1-based number on fails
    pub failing_captures_from: Option<usize>,
    /// 1-based capture numbers answered with an image whose pixel data is damaged
    pub corrupt_captures: Vec<usize>,
}

impl Default for DeviceFixture {
    fn default() -> Self {
        Self {
            viewport: ViewportFixture::default(),
            panels: Vec::new(),
            variants: VariantFixture::default(),
            console: ConsoleFixture::default(),
            expert_mode: Some(false),
            connected: true,
            disconnect_after_navigations: None,
            initializing_inspections: 0,
            capture_failures: 0,
            failing_captures_from: None,
            corrupt_captures: Vec::new(),
        }
    }
}

impl DeviceFixture {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn with_panel(mut self, panel: PanelFixture) -> Self {
        self.panels.push(panel);
        self
    }

    /// Logical height of the scrollable content region
    pub fn region_height(&self) -> f64 {
        (self.viewport.height - self.viewport.header_height).max(1.0)
    }
}

/// When the device fires a cancellation token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelTrigger {
    /// After this many panel navigations
    Navigations(usize),
    /// After this many profile switch requests
    Switches(usize),
    /// After this many viewport captures
    Captures(usize),
}

/// Counters for assertions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStats {
    pub inspections: u32,
    pub navigations: usize,
    pub switches: usize,
    pub captures: usize,
    pub visited: Vec<String>,
    pub submitted: Vec<String>,
    pub expert_mode: Option<bool>,
    pub overlay_hidden: bool,
    /// `hide` calls that took effect
    pub overlays_hidden: usize,
}

/// What a node of the rendered snapshot stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Structure,
    NavItem(usize),
    ExpertToggle,
    SubTab(usize),
    PrimarySelect,
    SecondarySelect,
    ContentRegion,
    StatusBar,
    TerminalInput,
    PlainInput,
}

struct RoleTree {
    builder: DomBuilder,
    roles: Vec<Role>,
}

impl RoleTree {
    fn add(&mut self, parent: Option<NodeId>, node: ElementNode, role: Role) -> NodeId {
        self.roles.push(role);
        self.builder.push(parent, node)
    }
}

#[derive(Debug, Default)]
struct ConsoleState {
    buffer: String,
    pending: VecDeque<String>,
    input: String,
}

#[derive(Debug)]
struct DeviceState {
    generation: u64,
    connected: bool,
    active_panel: Option<usize>,
    active_subpanel: usize,
    scroll_top: f64,
    overlay_hidden: bool,
    primary: String,
    secondary: String,
    faults: VecDeque<SwitchFault>,
    expert_mode: Option<bool>,
    capture_failures: u32,
    console: ConsoleState,
    cancel: Option<(CancelTrigger, CancellationToken)>,
    stats: DeviceStats,
}

pub struct SimulatedDevice {
    fixture: DeviceFixture,
    state: Mutex<DeviceState>,
}

impl SimulatedDevice {
    pub fn new(fixture: DeviceFixture) -> Self {
        let state = DeviceState {
            generation: 1,
            connected: fixture.connected,
            active_panel: None,
            active_subpanel: 0,
            scroll_top: 0.0,
            overlay_hidden: false,
            primary: fixture.variants.primary_active.clone(),
            secondary: fixture.variants.secondary_active.clone(),
            faults: fixture.variants.faults.iter().copied().collect(),
            expert_mode: fixture.expert_mode,
            capture_failures: fixture.capture_failures,
            console: ConsoleState::default(),
            cancel: None,
            stats: DeviceStats::default(),
        };
        Self {
            fixture,
            state: Mutex::new(state),
        }
    }

    pub fn fixture(&self) -> &DeviceFixture {
        &self.fixture
    }

    /// Fire `token` once `trigger` is reached
    pub fn cancel_on(&self, trigger: CancelTrigger, token: CancellationToken) {
        self.state.lock().cancel = Some((trigger, token));
    }

    /// Queue faults for the next profile switches
    pub fn inject_switch_faults(&self, faults: impl IntoIterator<Item = SwitchFault>) {
        self.state.lock().faults.extend(faults);
    }

    /// Current `(primary, secondary)` profile values
    pub fn variant_values(&self) -> (String, String) {
        let state = self.state.lock();
        (state.primary.clone(), state.secondary.clone())
    }

    pub fn stats(&self) -> DeviceStats {
        let state = self.state.lock();
        DeviceStats {
            expert_mode: state.expert_mode,
            overlay_hidden: state.overlay_hidden,
            ..state.stats.clone()
        }
    }

    fn content_height(&self, state: &DeviceState) -> f64 {
        let region = self.fixture.region_height();
        let Some(panel) = state.active_panel.and_then(|i| self.fixture.panels.get(i)) else {
            return region;
        };
        let height = match panel.subpanels.get(state.active_subpanel) {
            Some(sub) => sub.content_height,
            None => panel.content_height,
        };
        height.max(region)
    }

    fn scroll_metrics(&self, state: &DeviceState) -> ScrollMetrics {
        ScrollMetrics {
            scroll_top: state.scroll_top,
            scroll_height: self.content_height(state),
            client_height: self.fixture.region_height(),
        }
    }

    fn active_class(&self, state: &DeviceState) -> Option<&str> {
        state
            .active_panel
            .and_then(|i| self.fixture.panels.get(i))
            .map(|p| p.class.as_str())
    }

    /// Snapshot plus the role of every node, indexed by node id
    fn render_dom(&self, state: &DeviceState) -> (DomSnapshot, Vec<Role>) {
        let vp = &self.fixture.viewport;
        let mut tree = RoleTree {
            builder: DomBuilder::new(
                Viewport {
                    width: vp.width,
                    height: vp.height,
                },
                state.generation,
            ),
            roles: Vec::new(),
        };

        let body = tree.add(None, ElementNode::new("body"), Role::Structure);
        let header = tree.add(
            Some(body),
            ElementNode::new("div")
                .id("tabs")
                .rect(Rect::new(0.0, 0.0, vp.width, vp.header_height)),
            Role::Structure,
        );

        let ready = state.stats.inspections > self.fixture.initializing_inspections;
        let connected_nav = tree.add(
            Some(header),
            ElementNode::new("ul").class("mode-connected").visible(state.connected && ready),
            Role::Structure,
        );
        for (idx, panel) in self.fixture.panels.iter().enumerate() {
            let mut item = ElementNode::new("li").class(panel.class.clone()).text(panel.label.clone());
            if state.active_panel == Some(idx) {
                item = item.class("active");
            }
            tree.add(Some(connected_nav), item, Role::NavItem(idx));
        }
        tree.add(
            Some(header),
            ElementNode::new("ul").class("mode-disconnected").visible(!state.connected),
            Role::Structure,
        );

        let mut button = ElementNode::new("a").id("connectbutton").class("connect_state");
        if state.connected {
            button = button.class("active");
        }
        tree.add(Some(header), button, Role::Structure);

        if let Some(checked) = state.expert_mode {
            tree.add(
                Some(header),
                ElementNode::new("input")
                    .name("expertModeCheckbox")
                    .attr("type", "checkbox")
                    .checked(checked),
                Role::ExpertToggle,
            );
        }

        let content = tree.add(Some(body), ElementNode::new("div").id("content"), Role::Structure);
        let region = tree.add(
            Some(content),
            ElementNode::new("div")
                .class("tab_container")
                .rect(Rect::new(0.0, vp.header_height, vp.width, self.fixture.region_height()))
                .scroll(self.scroll_metrics(state)),
            Role::ContentRegion,
        );

        if let Some(panel) = state.active_panel.and_then(|i| self.fixture.panels.get(i)) {
            for (idx, sub) in panel.subpanels.iter().enumerate() {
                let mut tab = ElementNode::new("div").class("subtab").class(sub.class.clone());
                if idx == state.active_subpanel {
                    tab = tab.class("active");
                }
                tree.add(Some(region), tab, Role::SubTab(idx));
            }

            if panel.class == self.fixture.variants.panel {
                self.render_selects(state, &mut tree, region);
            }

            if panel.class == self.fixture.console.panel {
                let cli = tree.add(Some(region), ElementNode::new("div").class("cli"), Role::Structure);
                match self.fixture.console.backend {
                    ConsoleBackend::Widget | ConsoleBackend::Keystrokes => {
                        tree.add(
                            Some(cli),
                            ElementNode::new("textarea").class("xterm-helper-textarea"),
                            Role::TerminalInput,
                        );
                    }
                    ConsoleBackend::PlainInput => {
                        tree.add(
                            Some(cli),
                            ElementNode::new("input").name("command").value(state.console.input.clone()),
                            Role::PlainInput,
                        );
                    }
                    ConsoleBackend::Absent => {}
                }
            }
        }

        if vp.status_bar_height > 0.0 {
            tree.add(
                Some(body),
                ElementNode::new("div")
                    .id("status-bar")
                    .position(Positioning::Fixed)
                    .visible(!state.overlay_hidden)
                    .rect(Rect::new(
                        0.0,
                        vp.height - vp.status_bar_height,
                        vp.width,
                        vp.status_bar_height,
                    )),
                Role::StatusBar,
            );
        }

        (tree.builder.build(), tree.roles)
    }

    fn render_selects(&self, state: &DeviceState, tree: &mut RoleTree, region: NodeId) {
        let variants = &self.fixture.variants;
        let switch = tree.add(Some(region), ElementNode::new("div").class("profile-switch"), Role::Structure);

        let mut primary = ElementNode::new("select")
            .options(variants.primary.clone())
            .value(state.primary.clone());
        if variants.markup == ControlMarkup::Named {
            primary = primary.name("profile");
        }
        tree.add(Some(switch), primary, Role::PrimarySelect);

        if !variants.secondary.is_empty() {
            let mut secondary = ElementNode::new("select")
                .options(variants.secondary.clone())
                .value(state.secondary.clone());
            if variants.markup == ControlMarkup::Named {
                secondary = secondary.name("rate_profile");
            }
            tree.add(Some(switch), secondary, Role::SecondarySelect);
        }
    }

    /// Role behind `handle`, rejecting handles from an older render
    fn resolve(&self, state: &DeviceState, handle: &ElementHandle) -> PageResult<Role> {
        if handle.generation() != state.generation {
            return Err(PageError::StaleElement {
                node: handle.node(),
                held: handle.generation(),
                current: state.generation,
            });
        }
        let (_, roles) = self.render_dom(state);
        roles
            .get(handle.node().0 as usize)
            .copied()
            .ok_or_else(|| PageError::NotFound(handle.node().to_string()))
    }

    fn navigate(&self, state: &mut DeviceState, idx: usize) {
        state.active_panel = Some(idx);
        state.active_subpanel = 0;
        state.scroll_top = 0.0;
        state.generation += 1;
        state.stats.navigations += 1;
        state.stats.visited.push(self.fixture.panels[idx].class.clone());

        if let Some(limit) = self.fixture.disconnect_after_navigations {
            if state.stats.navigations >= limit {
                tracing::debug!(navigations = state.stats.navigations, "simulated connection lost");
                state.connected = false;
            }
        }
        if let Some((CancelTrigger::Navigations(n), token)) = &state.cancel {
            if state.stats.navigations >= *n {
                token.cancel();
            }
        }
    }

    fn switch(&self, state: &mut DeviceState, role: Role, value: &str) -> PageResult<()> {
        state.stats.switches += 1;
        if let Some((CancelTrigger::Switches(n), token)) = &state.cancel {
            if state.stats.switches >= *n {
                token.cancel();
            }
        }

        let (options, current) = match role {
            Role::PrimarySelect => (&self.fixture.variants.primary, &mut state.primary),
            _ => (&self.fixture.variants.secondary, &mut state.secondary),
        };
        if !options.iter().any(|o| o == value) {
            return Err(PageError::Script(format!("no option {value:?}")));
        }
        match state.faults.pop_front().unwrap_or(SwitchFault::Accept) {
            SwitchFault::Accept => {
                *current = value.to_string();
                state.generation += 1;
                Ok(())
            }
            SwitchFault::Reject => Ok(()),
            SwitchFault::Error => Err(PageError::Script("profile change failed".to_string())),
        }
    }

    fn run_command(&self, state: &mut DeviceState, command: &str) {
        let command = command.trim();
        state.stats.submitted.push(command.to_string());
        state.console.buffer.push_str(&format!("# {command}\n"));

        let response = self
            .fixture
            .console
            .responses
            .get(command)
            .cloned()
            .unwrap_or_else(|| format!("Unknown command: {command}\n"));
        let chars: Vec<char> = response.chars().collect();
        for chunk in chars.chunks(self.fixture.console.chunk_size.max(1)) {
            state.console.pending.push_back(chunk.iter().collect());
        }
    }

    fn render_frame(&self, state: &DeviceState) -> MockFramebuffer {
        let vp = &self.fixture.viewport;
        let scale = if vp.scale > 0.0 { vp.scale } else { 1.0 };
        let px = |logical: f64| (logical * scale).round().max(0.0) as u32;

        let width = px(vp.width).max(1);
        let height = px(vp.height).max(1);
        let header = px(vp.header_height).min(height);
        let mut fb = MockFramebuffer::with_color(width, height, BACKGROUND);

        fb.draw_rect(0, 0, width, header, HEADER);
        if let Some(class) = self.active_class(state) {
            fb.draw_text(4, 4, class, TEXT, HEADER);
        }

        if let Some(panel_idx) = state.active_panel {
            let seed = self.content_seed(state, panel_idx);
            let offset = px(state.scroll_top);
            let content_rows = px(self.content_height(state));
            for y in header..height {
                let row = offset + (y - header);
                if row < content_rows {
                    fb.draw_row(y, content_color(row, seed));
                }
            }
        }

        if vp.status_bar_height > 0.0 && !state.overlay_hidden {
            let bar = px(vp.status_bar_height).min(height);
            fb.draw_rect(0, height - bar, width, bar, STATUS_BAR);
        }
        fb
    }

    /// Distinguishes panels, sub-panels and profile selections in rendered frames
    fn content_seed(&self, state: &DeviceState, panel_idx: usize) -> u8 {
        let variants = &self.fixture.variants;
        let position = |options: &[String], value: &str| options.iter().position(|o| o == value).unwrap_or(0);
        let variant = if self.fixture.panels[panel_idx].class == variants.panel {
            position(&variants.primary[..], &state.primary) * 8 + position(&variants.secondary[..], &state.secondary)
        } else {
            0
        };
        ((panel_idx * 37 + state.active_subpanel * 11 + variant * 3) % 256) as u8
    }
}

/// Color of logical content row `row` (physical pixels) for a given seed
pub fn content_color(row: u32, seed: u8) -> [u8; 3] {
    [(row % 251) as u8, (row / 251 % 251) as u8, seed]
}

#[async_trait]
impl Page for SimulatedDevice {
    async fn inspect(&self) -> PageResult<DomSnapshot> {
        let mut state = self.state.lock();
        state.stats.inspections += 1;
        Ok(self.render_dom(&state).0)
    }

    async fn click(&self, target: ElementHandle) -> PageResult<()> {
        let mut state = self.state.lock();
        match self.resolve(&state, &target)? {
            Role::NavItem(idx) => {
                self.navigate(&mut state, idx);
                Ok(())
            }
            Role::SubTab(idx) => {
                state.active_subpanel = idx;
                state.scroll_top = 0.0;
                state.generation += 1;
                Ok(())
            }
            Role::ExpertToggle => {
                state.expert_mode = state.expert_mode.map(|v| !v);
                state.generation += 1;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn set_value(&self, target: ElementHandle, value: &str) -> PageResult<()> {
        let mut state = self.state.lock();
        match self.resolve(&state, &target)? {
            role @ (Role::PrimarySelect | Role::SecondarySelect) => self.switch(&mut state, role, value),
            Role::PlainInput => {
                state.console.input = value.to_string();
                Ok(())
            }
            _ => Err(PageError::Unsupported {
                node: target.node(),
                action: "set_value",
            }),
        }
    }

    async fn set_checked(&self, target: ElementHandle, checked: bool) -> PageResult<()> {
        let mut state = self.state.lock();
        match self.resolve(&state, &target)? {
            Role::ExpertToggle => {
                state.expert_mode = Some(checked);
                state.generation += 1;
                Ok(())
            }
            _ => Err(PageError::Unsupported {
                node: target.node(),
                action: "set_checked",
            }),
        }
    }

    async fn scroll_to(&self, target: ElementHandle, top: f64) -> PageResult<ScrollMetrics> {
        let mut state = self.state.lock();
        match self.resolve(&state, &target)? {
            Role::ContentRegion => {
                let max = (self.content_height(&state) - self.fixture.region_height()).max(0.0);
                state.scroll_top = top.clamp(0.0, max).floor();
                Ok(self.scroll_metrics(&state))
            }
            _ => Err(PageError::Unsupported {
                node: target.node(),
                action: "scroll_to",
            }),
        }
    }

    async fn hide(&self, target: ElementHandle) -> PageResult<()> {
        let mut state = self.state.lock();
        match self.resolve(&state, &target)? {
            Role::StatusBar => {
                state.overlay_hidden = true;
                state.stats.overlays_hidden += 1;
                Ok(())
            }
            _ => Err(PageError::Unsupported {
                node: target.node(),
                action: "hide",
            }),
        }
    }

    async fn restore_hidden(&self) -> PageResult<usize> {
        let mut state = self.state.lock();
        let restored = usize::from(state.overlay_hidden);
        state.overlay_hidden = false;
        Ok(restored)
    }

    async fn send_keys(&self, target: ElementHandle, keys: &[Key]) -> PageResult<()> {
        let mut state = self.state.lock();
        let role = self.resolve(&state, &target)?;
        let accepts = match role {
            Role::TerminalInput => self.fixture.console.backend == ConsoleBackend::Keystrokes,
            Role::PlainInput => true,
            _ => false,
        };
        if !accepts {
            return Err(PageError::Unsupported {
                node: target.node(),
                action: "send_keys",
            });
        }
        for key in keys {
            match key {
                Key::Char(c) => state.console.input.push(*c),
                Key::Enter => {
                    let command = std::mem::take(&mut state.console.input);
                    self.run_command(&mut state, &command);
                }
            }
        }
        Ok(())
    }

    async fn submit_console_command(&self, command: &str) -> PageResult<bool> {
        let mut state = self.state.lock();
        let on_console = self.active_class(&state) == Some(self.fixture.console.panel.as_str());
        if !on_console || self.fixture.console.backend != ConsoleBackend::Widget {
            return Ok(false);
        }
        self.run_command(&mut state, command);
        Ok(true)
    }

    async fn read_console(&self) -> PageResult<String> {
        let mut state = self.state.lock();
        if let Some(chunk) = state.console.pending.pop_front() {
            state.console.buffer.push_str(&chunk);
        }
        Ok(state.console.buffer.clone())
    }

    async fn clear_console(&self) -> PageResult<()> {
        self.state.lock().console.buffer.clear();
        Ok(())
    }
}

#[async_trait]
impl ViewportCapture for SimulatedDevice {
    async fn capture_viewport(&self) -> SnapshotResult<String> {
        let (frame, corrupt) = {
            let mut state = self.state.lock();
            state.stats.captures += 1;
            let number = state.stats.captures;
            if let Some((CancelTrigger::Captures(n), token)) = &state.cancel {
                if number >= *n {
                    token.cancel();
                }
            }
            if state.capture_failures > 0 {
                state.capture_failures -= 1;
                return Err(SnapshotError::Capture("capture primitive busy".to_string()));
            }
            if self.fixture.failing_captures_from.is_some_and(|from| number >= from) {
                return Err(SnapshotError::Capture("tab is not visible".to_string()));
            }
            (self.render_frame(&state), self.fixture.corrupt_captures.contains(&number))
        };
        if !corrupt {
            return frame.to_data_url();
        }
        let mut png = frame.to_png()?;
        damage_image_data(&mut png);
        Ok(to_data_url(&png))
    }
}

/// Flip the first bytes of the compressed pixel data; the header still reads fine
fn damage_image_data(png: &mut [u8]) {
    if let Some(pos) = png.windows(4).position(|w| w == b"IDAT") {
        for byte in png.iter_mut().skip(pos + 4).take(8) {
            *byte ^= 0xff;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::dom::Selector;
    use crate::snapshot::utils::decode_data_url;

    fn device() -> SimulatedDevice {
        SimulatedDevice::new(
            DeviceFixture::default()
                .with_panel(PanelFixture::new("tab_setup", 0.0))
                .with_panel(PanelFixture::new("tab_ports", 1180.0)),
        )
    }

    async fn open(device: &SimulatedDevice, class: &str) {
        let dom = device.inspect().await.unwrap();
        let item = dom.first_visible(&Selector::tag("li").class(class)).unwrap().id;
        device.click(dom.handle(item)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_handle_is_rejected() {
        let device = device();
        let dom = device.inspect().await.unwrap();
        let setup = dom.first_visible(&Selector::with_class("tab_setup")).unwrap().id;
        let ports = dom.first_visible(&Selector::with_class("tab_ports")).unwrap().id;
        device.click(dom.handle(setup)).await.unwrap();

        let err = device.click(dom.handle(ports)).await.unwrap_err();
        assert!(matches!(err, PageError::StaleElement { .. }));
    }

    #[tokio::test]
    async fn test_scroll_is_clamped() {
        let device = device();
        open(&device, "tab_ports").await;

        let dom = device.inspect().await.unwrap();
        let region = dom.first_visible(&Selector::with_class("tab_container")).unwrap().id;
        let metrics = device.scroll_to(dom.handle(region), 10_000.0).await.unwrap();
        assert_eq!(metrics.scroll_top, 780.0);
        assert!(metrics.at_bottom(5.0));
    }

    #[tokio::test]
    async fn test_rejected_switch_keeps_value() {
        let device = SimulatedDevice::new(
            DeviceFixture::default().with_panel(PanelFixture::new("tab_pid_tuning", 0.0)),
        );
        device.inject_switch_faults([SwitchFault::Reject]);
        open(&device, "tab_pid_tuning").await;

        let dom = device.inspect().await.unwrap();
        let select = dom.first_visible(&Selector::tag("select").name("profile")).unwrap().id;
        device.set_value(dom.handle(select), "2").await.unwrap();
        assert_eq!(device.variant_values().0, "0");
    }

    #[tokio::test]
    async fn test_console_output_streams_in_chunks() {
        let mut fixture = DeviceFixture::default().with_panel(PanelFixture::new("tab_cli", 0.0));
        fixture.console.chunk_size = 4;
        fixture.console.responses.insert("version".into(), "12345678".into());
        let device = SimulatedDevice::new(fixture);
        open(&device, "tab_cli").await;

        assert!(device.submit_console_command("version").await.unwrap());
        let first = device.read_console().await.unwrap();
        let second = device.read_console().await.unwrap();
        let third = device.read_console().await.unwrap();
        assert_eq!(first, "# version\n1234");
        assert_eq!(second, "# version\n12345678");
        assert_eq!(third, second);
    }

    #[tokio::test]
    async fn test_capture_shows_status_bar_until_hidden() {
        let device = device();
        open(&device, "tab_setup").await;

        let png = decode_data_url(&device.capture_viewport().await.unwrap()).unwrap();
        let frame = MockFramebuffer::from_png_bytes(&png).unwrap();
        assert_eq!(frame.get_pixel(0, 499), STATUS_BAR);

        let dom = device.inspect().await.unwrap();
        let bar = dom.first_visible(&Selector::with_id("status-bar")).unwrap().id;
        device.hide(dom.handle(bar)).await.unwrap();
        let png = decode_data_url(&device.capture_viewport().await.unwrap()).unwrap();
        let frame = MockFramebuffer::from_png_bytes(&png).unwrap();
        assert_ne!(frame.get_pixel(0, 499), STATUS_BAR);

        assert_eq!(device.restore_hidden().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_damaged_capture_keeps_its_header() {
        let mut fixture = DeviceFixture::default().with_panel(PanelFixture::new("tab_setup", 0.0));
        fixture.corrupt_captures = vec![2];
        let device = SimulatedDevice::new(fixture);

        let intact = decode_data_url(&device.capture_viewport().await.unwrap()).unwrap();
        assert!(image::load_from_memory(&intact).is_ok());

        let damaged = decode_data_url(&device.capture_viewport().await.unwrap()).unwrap();
        assert_eq!(crate::snapshot::utils::image_dimensions(&damaged).unwrap(), (800, 500));
        assert!(image::load_from_memory(&damaged).is_err());
    }

    #[tokio::test]
    async fn test_failing_captures_from() {
        let mut fixture = DeviceFixture::default();
        fixture.failing_captures_from = Some(2);
        let device = SimulatedDevice::new(fixture);
        assert!(device.capture_viewport().await.is_ok());
        assert!(device.capture_viewport().await.is_err());
        assert!(device.capture_viewport().await.is_err());
        assert_eq!(device.stats().captures, 3);
    }

    #[test]
    fn test_fixture_json_defaults() {
        let fixture = DeviceFixture::from_json(r#"{"panels": [{"class": "tab_setup"}]}"#).unwrap();
        assert_eq!(fixture.panels[0].class, "tab_setup");
        assert_eq!(fixture.viewport.width, 800.0);
        assert!(fixture.connected);
        assert_eq!(fixture.variants.primary.len(), 3);
    }
}
