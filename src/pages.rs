//! Server-rendered HTML for the browser-facing routes.

use maud::{html, Markup, DOCTYPE};

use crate::history::HistoryEntry;

pub const HISTORY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Values shown on the result page after a successful form upload.
#[derive(Debug, Clone)]
pub struct ResultView {
    pub filename: String,
    pub prediction: String,
    pub confidence: f64,
    pub filepath: String,
}

fn layout(title: &str, body: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (title) " | Poultry Disease Classification" }
            }
            body {
                nav {
                    a href="/" { "Home" } " | "
                    a href="/classify" { "Classify" } " | "
                    a href="/history" { "History" } " | "
                    a href="/about" { "About" }
                }
                main { (body) }
            }
        }
    }
}

fn upload_url(filename: &str) -> String {
    format!("/static/uploads/{filename}")
}

pub fn home() -> Markup {
    layout(
        "Home",
        html! {
            h1 { "Poultry Disease Classification" }
            p { "Upload a photo of a bird to get a health classification." }
            p { a href="/classify" { "Classify an image" } }
        },
    )
}

pub fn about() -> Markup {
    layout(
        "About",
        html! {
            h1 { "About" }
            p {
                "This service stores uploaded poultry images and returns a classification. "
                "Model inference is not connected yet, so every image receives the same "
                "placeholder result."
            }
        },
    )
}

/// Upload form, optionally showing a message from a rejected submission.
pub fn classify_form(message: Option<&str>, allowed_extensions: &[String]) -> Markup {
    let accept = allowed_extensions
        .iter()
        .map(|ext| format!(".{ext}"))
        .collect::<Vec<_>>()
        .join(",");

    layout(
        "Classify",
        html! {
            h1 { "Classify an image" }
            @if let Some(message) = message {
                p class="alert" role="alert" { (message) }
            }
            form id="uploadForm" method="post" action="/classify" enctype="multipart/form-data" {
                input type="file" id="file" name="file" accept=(accept);
                button type="submit" { "Classify" }
            }
            p { "Accepted formats: " (describe_extensions(allowed_extensions)) "." }
        },
    )
}

pub fn result(view: &ResultView) -> Markup {
    layout(
        "Result",
        html! {
            h1 { "Classification result" }
            img src=(upload_url(&view.filename)) alt=(view.filename) style="max-width: 400px";
            dl {
                dt { "File" }
                dd { (view.filename) }
                dt { "Prediction" }
                dd class="prediction" { (view.prediction) }
                dt { "Confidence" }
                dd class="confidence" { (format!("{:.1}%", view.confidence)) }
                dt { "Stored at" }
                dd { (view.filepath) }
            }
            p { a href="/classify" { "Classify another image" } }
        },
    )
}

pub fn history(uploads: &[HistoryEntry]) -> Markup {
    layout(
        "History",
        html! {
            h1 { "History" }
            @if uploads.is_empty() {
                p { "No uploads yet." }
            } @else {
                table {
                    thead { tr { th { "File" } th { "Uploaded" } } }
                    tbody {
                        @for upload in uploads {
                            tr {
                                td { a href=(upload_url(&upload.filename)) { (upload.filename) } }
                                td { (upload.created_at.format(HISTORY_TIME_FORMAT)) }
                            }
                        }
                    }
                }
            }
        },
    )
}

pub fn not_found() -> Markup {
    layout(
        "Not Found",
        html! {
            h1 { "Page not found" }
            p { "The page you requested does not exist." }
        },
    )
}

pub fn internal_error() -> Markup {
    layout(
        "Server Error",
        html! {
            h1 { "Internal server error" }
            p { "Something went wrong. Please try again later." }
        },
    )
}

/// `["png", "jpg", "jpeg"]` becomes `"PNG, JPG or JPEG"`.
pub fn describe_extensions(extensions: &[String]) -> String {
    let upper: Vec<String> = extensions.iter().map(|e| e.to_ascii_uppercase()).collect();
    match upper.split_last() {
        None => String::new(),
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} or {last}", rest.join(", ")),
    }
}
