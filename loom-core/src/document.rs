//! The state document: a lossless XML tree paired with its typed [`Ledger`].
//!
//! # Schema
//!
//! ```text
//! <loom-status version="1">
//!   <project><name/><last-modified/></project>
//!   <aml enabled="true"/>
//!   <yolo enabled="false"><breakpoint name="..." enabled="true"/></yolo>
//!   <current-position><feature/><epic/><story/><task/></current-position>
//!   <features>
//!     <feature name="payments" is-active="true">
//!       <epic name="epic-1">
//!         <story id="story-1" status="in-progress">
//!           <review-tasks><task id="r1">...</task></review-tasks>
//!           <tasks><task id="1" done="true" commit="abc">...</task></tasks>
//!         </story>
//!       </epic>
//!     </feature>
//!   </features>
//! </loom-status>
//! ```
//!
//! Rendering writes the ledger back into the tree it was parsed from,
//! touching only nodes whose value changed. Elements and comments the schema
//! does not know about are carried along untouched.

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::ledger::{
    AmlBlock, Breakpoint, Epic, Feature, Ledger, Position, ProjectMeta, Story, Task, YoloBlock,
};
use crate::types::{CommitId, EpicName, FeatureName, StoryId, StoryStatus, TaskId, TaskOrigin};
use crate::xml::{Element, XmlDocument, XmlError};

pub const ROOT_ELEMENT: &str = "loom-status";
pub const SCHEMA_VERSION: &str = "1";

/// Why a document could not be turned into a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("malformed XML at {0}")]
    Xml(#[from] XmlError),

    #[error("schema violation at {path}: {message}")]
    Schema { path: String, message: String },
}

fn schema(path: impl Into<String>, message: impl Into<String>) -> DocumentError {
    DocumentError::Schema {
        path: path.into(),
        message: message.into(),
    }
}

#[derive(Debug, Clone)]
pub struct StatusDocument {
    xml: XmlDocument,
    ledger: Ledger,
}

impl StatusDocument {
    /// A fresh document holding `ledger`.
    pub fn from_ledger(ledger: Ledger) -> Self {
        let root = Element::new(ROOT_ELEMENT).with_attr("version", SCHEMA_VERSION);
        let mut doc = Self {
            xml: XmlDocument::new(root),
            ledger,
        };
        doc.sync();
        doc
    }

    pub fn parse(src: &str) -> Result<Self, DocumentError> {
        let xml = XmlDocument::parse(src)?;
        let ledger = read_ledger(xml.root())?;
        Ok(Self { xml, ledger })
    }

    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, DocumentError> {
        let xml = XmlDocument::parse_bytes(bytes)?;
        let ledger = read_ledger(xml.root())?;
        Ok(Self { xml, ledger })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    pub fn set_ledger(&mut self, ledger: Ledger) {
        self.ledger = ledger;
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    /// Write the ledger into the tree and serialize it.
    pub fn render(&mut self) -> String {
        self.sync();
        self.xml.to_string()
    }

    fn sync(&mut self) {
        write_ledger(self.xml.root_mut(), &self.ledger);
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ---------------------------------------------------------------------------
// 1. Reading
// ---------------------------------------------------------------------------

fn read_ledger(root: &Element) -> Result<Ledger, DocumentError> {
    if root.name() != ROOT_ELEMENT {
        return Err(schema(
            root.name(),
            format!("expected root element <{ROOT_ELEMENT}>"),
        ));
    }
    match root.attr("version") {
        Some(SCHEMA_VERSION) | None => {}
        Some(other) => {
            return Err(schema(
                ROOT_ELEMENT,
                format!("unsupported schema version '{other}'"),
            ))
        }
    }

    let project = root
        .child("project")
        .ok_or_else(|| schema(ROOT_ELEMENT, "missing <project>"))?;
    let name = project
        .child("name")
        .map(Element::text)
        .ok_or_else(|| schema("project", "missing <name>"))?;
    let last_modified = match project.child("last-modified").map(Element::text) {
        Some(raw) if !raw.trim().is_empty() => Some(
            DateTime::parse_from_rfc3339(raw.trim())
                .map_err(|e| schema("project/last-modified", e.to_string()))?
                .with_timezone(&Utc),
        ),
        _ => None,
    };

    let aml = match root.child("aml") {
        Some(el) => Some(AmlBlock {
            enabled: read_bool(el, "enabled", "aml")?.unwrap_or(false),
        }),
        None => None,
    };

    let yolo = match root.child("yolo") {
        Some(el) => {
            let mut breakpoints = Vec::new();
            for bp in el.children_named("breakpoint") {
                let name = required_attr(bp, "name", "yolo/breakpoint")?;
                if breakpoints.iter().any(|b: &Breakpoint| b.name == name) {
                    return Err(schema("yolo", format!("duplicate breakpoint '{name}'")));
                }
                breakpoints.push(Breakpoint {
                    enabled: read_bool(bp, "enabled", "yolo/breakpoint")?.unwrap_or(true),
                    name: name.to_owned(),
                });
            }
            Some(YoloBlock {
                enabled: read_bool(el, "enabled", "yolo")?.unwrap_or(false),
                breakpoints,
            })
        }
        None => None,
    };

    let position = match root.child("current-position") {
        Some(el) => Position {
            feature: read_position_field(el, "feature", |s| FeatureName::new(s))?,
            epic: read_position_field(el, "epic", |s| EpicName::new(s))?,
            story: read_position_field(el, "story", |s| StoryId::new(s))?,
            task: read_position_field(el, "task", |s| TaskId::new(s))?,
        },
        None => Position::default(),
    };

    let mut features = Vec::new();
    if let Some(container) = root.child("features") {
        for el in container.children_named("feature") {
            let feature = read_feature(el)?;
            if features.iter().any(|f: &Feature| f.name == feature.name) {
                return Err(schema(
                    "features",
                    format!("duplicate feature '{}'", feature.name),
                ));
            }
            features.push(feature);
        }
    }

    Ok(Ledger {
        project: ProjectMeta {
            name,
            last_modified,
        },
        aml,
        yolo,
        position,
        features,
    })
}

fn read_feature(el: &Element) -> Result<Feature, DocumentError> {
    let raw = required_attr(el, "name", "features/feature")?;
    let name = FeatureName::new(raw).map_err(|e| schema("features/feature", e.to_string()))?;
    let path = name.to_string();
    let mut epics: Vec<Epic> = Vec::new();
    for ep in el.children_named("epic") {
        let raw = required_attr(ep, "name", &path)?;
        let epic_name = EpicName::new(raw).map_err(|e| schema(&path, e.to_string()))?;
        if epics.iter().any(|e| e.name == epic_name) {
            return Err(schema(&path, format!("duplicate epic '{epic_name}'")));
        }
        let epic_path = format!("{path}/{epic_name}");
        let mut stories: Vec<Story> = Vec::new();
        for st in ep.children_named("story") {
            let story = read_story(st, &epic_path)?;
            if stories.iter().any(|s| s.id == story.id) {
                return Err(schema(&epic_path, format!("duplicate story '{}'", story.id)));
            }
            stories.push(story);
        }
        epics.push(Epic {
            name: epic_name,
            stories,
        });
    }
    Ok(Feature {
        is_active: read_bool(el, "is-active", &path)?.unwrap_or(false),
        name,
        epics,
    })
}

fn read_story(el: &Element, parent: &str) -> Result<Story, DocumentError> {
    let raw = required_attr(el, "id", parent)?;
    let id = StoryId::new(raw).map_err(|e| schema(parent, e.to_string()))?;
    let path = format!("{parent}/{id}");
    let status = match el.attr("status") {
        Some(raw) => raw
            .parse::<StoryStatus>()
            .map_err(|e| schema(&path, e))?,
        None => StoryStatus::NotStarted,
    };
    let review_tasks = match el.child("review-tasks") {
        Some(c) => read_tasks(c, &format!("{path}/review-tasks"), TaskOrigin::Review)?,
        None => Vec::new(),
    };
    let tasks = match el.child("tasks") {
        Some(c) => read_tasks(c, &format!("{path}/tasks"), TaskOrigin::Planned)?,
        None => Vec::new(),
    };
    for t in &review_tasks {
        if tasks.iter().any(|o| o.id == t.id) {
            return Err(schema(&path, format!("task id '{}' is used twice", t.id)));
        }
    }
    Ok(Story {
        id,
        status,
        review_tasks,
        tasks,
    })
}

fn read_tasks(
    container: &Element,
    path: &str,
    default_origin: TaskOrigin,
) -> Result<Vec<Task>, DocumentError> {
    let mut out: Vec<Task> = Vec::new();
    for el in container.children_named("task") {
        let raw = required_attr(el, "id", path)?;
        let id = TaskId::new(raw).map_err(|e| schema(path, e.to_string()))?;
        if out.iter().any(|t| t.id == id) {
            return Err(schema(path, format!("duplicate task '{id}'")));
        }
        let commit = match el.attr("commit") {
            Some(raw) => Some(CommitId::new(raw).map_err(|e| schema(path, e.to_string()))?),
            None => None,
        };
        let origin = match el.attr("origin") {
            Some("review") => TaskOrigin::Review,
            Some("planned") => TaskOrigin::Planned,
            Some(other) => return Err(schema(path, format!("unknown task origin '{other}'"))),
            None => default_origin,
        };
        out.push(Task {
            done: read_bool(el, "done", path)?.unwrap_or(false),
            id,
            description: el.text(),
            commit,
            origin,
        });
    }
    Ok(out)
}

fn required_attr<'a>(el: &'a Element, name: &str, path: &str) -> Result<&'a str, DocumentError> {
    el.attr(name).ok_or_else(|| {
        schema(
            path,
            format!("<{}> is missing the '{name}' attribute", el.name()),
        )
    })
}

fn read_bool(el: &Element, name: &str, path: &str) -> Result<Option<bool>, DocumentError> {
    match el.attr(name) {
        Some("true") => Ok(Some(true)),
        Some("false") => Ok(Some(false)),
        Some(other) => Err(schema(
            path,
            format!("attribute '{name}' must be true or false, found '{other}'"),
        )),
        None => Ok(None),
    }
}

fn read_position_field<T, E: ToString>(
    el: &Element,
    name: &str,
    parse: impl Fn(String) -> Result<T, E>,
) -> Result<Option<T>, DocumentError> {
    match el.child(name).map(|c| c.text()) {
        Some(raw) if !raw.trim().is_empty() => parse(raw.trim().to_owned())
            .map(Some)
            .map_err(|e| schema(format!("current-position/{name}"), e.to_string())),
        _ => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// 2. Writing
// ---------------------------------------------------------------------------

fn write_ledger(root: &mut Element, ledger: &Ledger) {
    let project = root.ensure_child("project", 0);
    project.ensure_child("name", 1).set_text(&ledger.project.name);
    match &ledger.project.last_modified {
        Some(ts) => {
            project
                .ensure_child("last-modified", 1)
                .set_text(&format_timestamp(ts));
        }
        None => {
            if let Some(el) = project.child_mut("last-modified") {
                el.set_text("");
            }
        }
    }

    if let Some(aml) = &ledger.aml {
        let el = root.ensure_child("aml", 0);
        el.set_attr("enabled", bool_str(aml.enabled));
    }

    if let Some(yolo) = &ledger.yolo {
        let el = root.ensure_child("yolo", 0);
        el.set_attr("enabled", bool_str(yolo.enabled));
        sync_list(
            el,
            1,
            "breakpoint",
            "name",
            &yolo.breakpoints,
            |b| b.name.as_str(),
            |el, b, _| {
                el.set_attr("enabled", bool_str(b.enabled));
            },
        );
    }

    if !ledger.position.is_empty() || root.child("current-position").is_some() {
        let el = root.ensure_child("current-position", 0);
        let p = &ledger.position;
        write_position_field(el, "feature", p.feature.as_ref().map(|v| v.as_str()));
        write_position_field(el, "epic", p.epic.as_ref().map(|v| v.as_str()));
        write_position_field(el, "story", p.story.as_ref().map(|v| v.as_str()));
        write_position_field(el, "task", p.task.as_ref().map(|v| v.as_str()));
    }

    if !ledger.features.is_empty() || root.child("features").is_some() {
        let container = root.ensure_child("features", 0);
        sync_list(
            container,
            1,
            "feature",
            "name",
            &ledger.features,
            |f| f.name.as_str(),
            write_feature,
        );
    }
}

fn write_position_field(el: &mut Element, name: &str, value: Option<&str>) {
    if let Some(child) = el.child_mut(name) {
        child.set_text(value.unwrap_or(""));
        return;
    }
    if let Some(v) = value {
        el.push_element(Element::new(name).with_text(v), 1);
    }
}

fn write_feature(el: &mut Element, f: &Feature, depth: usize) {
    set_bool_attr(el, "is-active", f.is_active, false);
    sync_list(el, depth, "epic", "name", &f.epics, |e| e.name.as_str(), |el, e: &Epic, depth| {
        sync_list(el, depth, "story", "id", &e.stories, |s| s.id.as_str(), write_story);
    });
}

fn write_story(el: &mut Element, s: &Story, depth: usize) {
    if el.attr("status").is_some() || s.status != StoryStatus::NotStarted {
        el.set_attr("status", s.status.as_str());
    }
    if !s.review_tasks.is_empty() || el.child("review-tasks").is_some() {
        if el.child("review-tasks").is_none() {
            el.insert_element_before(Element::new("review-tasks"), "tasks", depth);
        }
        if let Some(c) = el.child_mut("review-tasks") {
            sync_list(c, depth + 1, "task", "id", &s.review_tasks, |t| t.id.as_str(), |el, t, _| {
                write_task(el, t, TaskOrigin::Review)
            });
        }
    }
    if !s.tasks.is_empty() || el.child("tasks").is_some() {
        let c = el.ensure_child("tasks", depth);
        sync_list(c, depth + 1, "task", "id", &s.tasks, |t| t.id.as_str(), |el, t, _| {
            write_task(el, t, TaskOrigin::Planned)
        });
    }
}

fn write_task(el: &mut Element, t: &Task, implied_origin: TaskOrigin) {
    set_bool_attr(el, "done", t.done, false);
    match &t.commit {
        Some(c) => {
            el.set_attr("commit", c.as_str());
        }
        None => {
            el.remove_attr("commit");
        }
    }
    if t.origin == implied_origin {
        if el.attr("origin").is_some() {
            let origin = match t.origin {
                TaskOrigin::Planned => "planned",
                TaskOrigin::Review => "review",
            };
            el.set_attr("origin", origin);
        }
    } else {
        match t.origin {
            TaskOrigin::Review => el.set_attr("origin", "review"),
            TaskOrigin::Planned => el.set_attr("origin", "planned"),
        };
    }
    el.set_text(&t.description);
}

fn bool_str(v: bool) -> &'static str {
    if v {
        "true"
    } else {
        "false"
    }
}

/// Set a boolean attribute, leaving it absent when it is absent and `value`
/// equals the implied default.
fn set_bool_attr(el: &mut Element, name: &str, value: bool, default: bool) {
    if el.attr(name).is_none() && value == default {
        return;
    }
    el.set_attr(name, bool_str(value));
}

/// Bring the keyed children of `container` in line with `items`.
///
/// Existing elements are updated in place. New items are appended when the
/// current keys are a prefix of the desired ones; any other change (removal,
/// reorder, insertion in the middle) re-lays out just this container. Nodes
/// other than the keyed elements are kept, ahead of the keyed ones.
fn sync_list<T>(
    container: &mut Element,
    depth: usize,
    tag: &str,
    key_attr: &str,
    items: &[T],
    key: impl Fn(&T) -> &str,
    write: impl Fn(&mut Element, &T, usize),
) {
    let current: Vec<String> = container
        .children_named(tag)
        .filter_map(|e| e.attr(key_attr).map(str::to_owned))
        .collect();
    let keyed = container.children_named(tag).count();
    let desired: Vec<&str> = items.iter().map(&key).collect();

    let prefix = keyed == current.len()
        && current.len() <= desired.len()
        && current.iter().zip(&desired).all(|(a, b)| a == b);

    if prefix {
        for item in items {
            let k = key(item);
            let existing = container
                .elements_mut()
                .find(|e| e.name() == tag && e.attr(key_attr) == Some(k));
            match existing {
                Some(el) => write(el, item, depth + 1),
                None => {
                    let el = container.push_element(Element::new(tag).with_attr(key_attr, k), depth);
                    write(el, item, depth + 1);
                }
            }
        }
        return;
    }

    let mut pool: Vec<Element> = Vec::new();
    for node in container.take_nodes() {
        match node {
            crate::xml::Node::Element(e) if e.name() == tag => pool.push(e),
            other => container.push_node(other, depth),
        }
    }
    for item in items {
        let k = key(item);
        let el = match pool.iter().position(|e| e.attr(key_attr) == Some(k)) {
            Some(i) => pool.swap_remove(i),
            None => Element::new(tag).with_attr(key_attr, k),
        };
        let el = container.push_element(el, depth);
        write(el, item, depth + 1);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
