//! A minimal HTML node tree.
//!
//! Pages are kept as trees until an executor writes them, so the test
//! executor can inspect link targets and forms without parsing markup.

use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element {
        name: &'static str,
        attributes: Vec<(String, String)>,
        children: Vec<Node>,
    },
    /// Escaped text.
    Text(String),
    /// Markup inserted verbatim.
    Raw(String),
}

/// A form found in a page: its action and `(name, value)` inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    pub action: String,
    pub method: String,
    pub inputs: Vec<(String, String)>,
}

const VOID_ELEMENTS: &[&str] = &["input", "meta", "link", "br", "img"];

impl Node {
    pub fn element(name: &'static str, attributes: Vec<(&str, String)>, children: Vec<Node>) -> Node {
        Node::Element {
            name,
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            children,
        }
    }

    pub fn text(text: impl Into<String>) -> Node {
        Node::Text(text.into())
    }

    pub fn raw(markup: impl Into<String>) -> Node {
        Node::Raw(markup.into())
    }

    pub fn link(href: impl Into<String>, children: Vec<Node>) -> Node {
        Node::element("a", vec![("href", href.into())], children)
    }

    pub fn div(class: &str, children: Vec<Node>) -> Node {
        Node::element("div", vec![("class", class.to_string())], children)
    }

    pub fn p(children: Vec<Node>) -> Node {
        Node::element("p", Vec::new(), children)
    }

    pub fn h1(text: impl Into<String>) -> Node {
        Node::element("h1", Vec::new(), vec![Node::text(text)])
    }

    pub fn h2(text: impl Into<String>) -> Node {
        Node::element("h2", Vec::new(), vec![Node::text(text)])
    }

    pub fn ul(items: Vec<Node>) -> Node {
        Node::element(
            "ul",
            Vec::new(),
            items
                .into_iter()
                .map(|item| Node::element("li", Vec::new(), vec![item]))
                .collect(),
        )
    }

    /// A form submitted with `method` to `action`.
    pub fn form(action: impl Into<String>, method: &str, children: Vec<Node>) -> Node {
        Node::element(
            "form",
            vec![("action", action.into()), ("method", method.to_string())],
            children,
        )
    }

    pub fn input(kind: &str, name: &str, value: impl Into<String>) -> Node {
        Node::element(
            "input",
            vec![
                ("type", kind.to_string()),
                ("name", name.to_string()),
                ("value", value.into()),
            ],
            Vec::new(),
        )
    }

    pub fn submit(label: impl Into<String>) -> Node {
        Node::element("button", vec![("type", "submit".to_string())], vec![Node::text(label)])
    }

    /// A complete document with a title and body.
    pub fn document(title: impl Into<String>, body: Vec<Node>) -> Node {
        Node::element(
            "html",
            Vec::new(),
            vec![
                Node::element(
                    "head",
                    Vec::new(),
                    vec![
                        Node::element("meta", vec![("charset", "utf-8".to_string())], Vec::new()),
                        Node::element("title", Vec::new(), vec![Node::text(title)]),
                    ],
                ),
                Node::element("body", Vec::new(), body),
            ],
        )
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    /// Render with a doctype when the root is an `html` element.
    pub fn render_document(&self) -> String {
        match self {
            Node::Element { name: "html", .. } => format!("<!DOCTYPE html>{}", self.render()),
            _ => self.render(),
        }
    }

    fn render_into(&self, out: &mut String) {
        match self {
            Node::Text(text) => out.push_str(&escape(text)),
            Node::Raw(markup) => out.push_str(markup),
            Node::Element {
                name,
                attributes,
                children,
            } => {
                out.push('<');
                out.push_str(name);
                for (key, value) in attributes {
                    let _ = write!(out, " {key}=\"{}\"", escape(value));
                }
                out.push('>');
                if VOID_ELEMENTS.contains(name) {
                    return;
                }
                for child in children {
                    child.render_into(out);
                }
                let _ = write!(out, "</{name}>");
            }
        }
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        match self {
            Node::Element { attributes, .. } => attributes
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        f(self);
        if let Node::Element { children, .. } = self {
            for child in children {
                child.visit(f);
            }
        }
    }

    /// `href` of every link, in document order.
    pub fn link_targets(&self) -> Vec<String> {
        let mut targets = Vec::new();
        self.visit(&mut |node| {
            if let Node::Element { name: "a", .. } = node {
                if let Some(href) = node.attribute("href") {
                    targets.push(href.to_string());
                }
            }
        });
        targets
    }

    /// Every form with its named inputs.
    pub fn forms(&self) -> Vec<Form> {
        let mut forms = Vec::new();
        self.visit(&mut |node| {
            if let Node::Element { name: "form", .. } = node {
                let mut inputs = Vec::new();
                node.visit(&mut |child| {
                    if let Node::Element { name: "input", .. } = child {
                        if let Some(name) = child.attribute("name") {
                            let value = child.attribute("value").unwrap_or_default();
                            inputs.push((name.to_string(), value.to_string()));
                        }
                    }
                });
                forms.push(Form {
                    action: node.attribute("action").unwrap_or_default().to_string(),
                    method: node.attribute("method").unwrap_or("get").to_lowercase(),
                    inputs,
                });
            }
        });
        forms
    }
}

/// The page rendered for an error response.
pub fn error_page(message: &str) -> Node {
    Node::document(
        "Error",
        vec![Node::div(
            "error",
            vec![Node::h1("Error"), Node::p(vec![Node::text(message)])],
        )],
    )
}

/// Escape text for use in HTML or XML content and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
