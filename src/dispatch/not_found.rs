//! Catch-all for requests no route matched.

use crate::dispatch::handler::{BoxMiddleware, IntoMiddleware};
use crate::error::BoxError;
use crate::http::{Request, Response};

/// 404 with an HTML body naming the method and URL.
pub fn not_found() -> BoxMiddleware {
    (|req: Request, res: Response| async move {
        res.status(404)
            .set_header("Content-Type", "text/html; charset=utf-8");
        res.end(not_found_page(req.method(), req.url()))?;
        Ok::<_, BoxError>(())
    })
    .into_middleware()
}

fn not_found_page(method: &str, url: &str) -> String {
    format!(
        "<h1>File Not Found</h1><hr/><i>The page you are looking for does not exist. \
         Method: {} {}</i>",
        method.to_ascii_uppercase(),
        escape_html(url)
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::dispatch;
    use crate::engine::mock::{body_stream, MockRequest, MockResponse};
    use crate::engine::AbortSignal;

    #[tokio::test]
    async fn names_method_and_url() {
        let raw = MockRequest::new("POST", "/missing?x=1");
        let req = Request::from_raw(&raw, body_stream(Vec::<&'static str>::new()), String::new());
        let (raw_res, recording) = MockResponse::new();
        let res = Response::new(raw_res, AbortSignal::never());

        dispatch(vec![not_found()].into(), req, res, AbortSignal::never()).await;

        let out = recording.snapshot();
        assert_eq!(out.status, Some(404));
        assert_eq!(out.header("content-type"), Some("text/html; charset=utf-8"));
        assert!(out.body().contains("Method: POST /missing"));
        assert_eq!(out.end_calls, 1);
    }

    #[test]
    fn url_is_escaped() {
        let page = not_found_page("get", "/<script>");
        assert!(page.contains("Method: GET /&lt;script&gt;"));
        assert!(!page.contains("<script>"));
    }
}
