use std::collections::HashMap;
use std::sync::Arc;

use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::sink::{LogEntry, LogLevel, LogSink};

/// Dashboard routes: `GET /?level=<LEVEL>` renders that level's entries
/// (default INFO). Peripheral surface; the pipeline itself never depends on
/// it. Every handled request is mirrored to the combined access stream.
pub fn routes(
    sink: Arc<LogSink>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let dashboard = warp::get()
        .and(warp::path::end())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_sink(sink.clone()))
        .map(|params: HashMap<String, String>, sink: Arc<LogSink>| {
            let requested = params.get("level").map(String::as_str).unwrap_or("INFO");
            match LogLevel::parse(requested) {
                Some(level) => {
                    // Mid-run read failures degrade to an empty view.
                    let entries = sink.query(level).unwrap_or_default();
                    warp::reply::with_status(
                        warp::reply::html(render_dashboard(level, &entries)),
                        StatusCode::OK,
                    )
                    .into_response()
                }
                None => warp::reply::with_status(
                    format!("Unknown log level: {}", requested),
                    StatusCode::BAD_REQUEST,
                )
                .into_response(),
            }
        });

    let access_sink = sink;
    let access = warp::log::custom(move |info| {
        let remote = info
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "-".to_string());
        access_sink.append_access(&format!(
            "{} \"{} {}\" {}",
            remote,
            info.method(),
            info.path(),
            info.status().as_u16()
        ));
    });

    dashboard.with(access)
}

fn with_sink(
    sink: Arc<LogSink>,
) -> impl Filter<Extract = (Arc<LogSink>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || sink.clone())
}

fn render_dashboard(level: LogLevel, entries: &[LogEntry]) -> String {
    let mut options = String::new();
    for candidate in LogLevel::ALL {
        let selected = if candidate == level { " selected" } else { "" };
        options.push_str(&format!(
            "<option value=\"{0}\"{1}>{0}</option>",
            candidate, selected
        ));
    }

    let lines: Vec<String> = entries.iter().map(LogEntry::render).collect();
    format!(
        "<h1>Log Dashboard</h1>\n\
         <form method=\"get\" style=\"margin-bottom: 20px;\">\n\
         <label for=\"level\">Log Level:</label>\n\
         <select id=\"level\" name=\"level\" onchange=\"this.form.submit()\">{}</select>\n\
         </form>\n\
         <pre>{}</pre>",
        options,
        lines.join("\n")
    )
}
