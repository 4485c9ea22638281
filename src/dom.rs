use std::sync::Arc;

use headless_chrome::Tab;

use crate::error::ActionError;
use crate::types::{PageSnapshot, VISIBLE_TEXT_MAX_CHARS};

/// JavaScript evaluated in the page to describe it as a `PageSnapshot`.
///
/// Read only apart from tagging interactive elements with sequential
/// `data-eid` attributes, which become their selectors. Tags already present
/// are reused so selectors stay stable between snapshots of the same page.
const SNAPSHOT_JS: &str = r#"
(() => {
  const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','SVG','LINK','TEMPLATE']);
  let next = 0;
  document.querySelectorAll('[data-eid]').forEach(el => {
    const n = parseInt((el.getAttribute('data-eid') || '').slice(1), 10);
    if (!isNaN(n) && n >= next) next = n + 1;
  });

  function isVisible(el) {
    if (el.offsetParent === null && el.tagName !== 'BODY' && el.tagName !== 'HTML') return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0';
  }

  function isClickable(el) {
    if (el.disabled) return false;
    const tag = el.tagName;
    if (['A','BUTTON','SELECT','SUMMARY','LABEL'].includes(tag)) return true;
    if (tag === 'INPUT') return true;
    const role = el.getAttribute('role');
    if (role === 'button' || role === 'link' || role === 'tab' || role === 'menuitem') return true;
    return typeof el.onclick === 'function';
  }

  function selectorOf(el) {
    let eid = el.getAttribute('data-eid');
    if (!eid) {
      eid = 'e' + (next++);
      el.setAttribute('data-eid', eid);
    }
    return '[data-eid="' + eid + '"]';
  }

  function label(el) {
    const text = (el.innerText || el.value || el.getAttribute('aria-label') || el.title || el.placeholder || '');
    return text.trim().replace(/\s+/g, ' ').slice(0, 80);
  }

  const interactive = [];
  const buttons = [];
  const links = [];
  const candidates = document.querySelectorAll(
    'a, button, input, textarea, select, summary, [role=button], [role=link], [role=tab], [onclick]'
  );
  for (const el of candidates) {
    if (SKIP.has(el.tagName)) continue;
    const visible = isVisible(el);
    if (!visible && interactive.length > 200) continue;
    const entry = {
      tag: el.tagName.toLowerCase(),
      text: label(el),
      selector: selectorOf(el),
      is_visible: visible,
      is_clickable: isClickable(el),
    };
    if (entry.tag === 'button' || el.getAttribute('role') === 'button'
        || (entry.tag === 'input' && ['submit','button'].includes(el.type))) {
      buttons.push(entry);
    } else {
      interactive.push(entry);
    }
    if (entry.tag === 'a' && el.href) {
      links.push({ text: entry.text, href: el.href, selector: entry.selector });
    }
  }

  const forms = [...document.forms].map(form => ({
    action: form.action || '',
    method: (form.method || 'get').toLowerCase(),
    inputs: [...form.querySelectorAll('input, textarea, select')]
      .filter(i => i.type !== 'hidden')
      .map(i => ({
        kind: i.type || i.tagName.toLowerCase(),
        name: i.name || '',
        placeholder: i.placeholder || '',
        label: (i.labels && i.labels[0] ? i.labels[0].innerText.trim() : ''),
      })),
    submit_text: (() => {
      const s = form.querySelector('[type=submit], button:not([type])');
      return s ? label(s) : '';
    })(),
  }));

  const meta = document.querySelector('meta[name="description"]');
  return JSON.stringify({
    url: window.location.href,
    title: document.title || '',
    description: meta ? (meta.content || '') : '',
    visible_text: (document.body ? document.body.innerText : '').replace(/\n{3,}/g, '\n\n'),
    interactive_elements: interactive,
    links: links.slice(0, 100),
    forms: forms,
    buttons: buttons,
  });
})()
"#;

/// Run the snapshot script on `tab`.
pub fn capture_snapshot(tab: &Arc<Tab>) -> Result<PageSnapshot, ActionError> {
    let result = tab
        .evaluate(SNAPSHOT_JS, false)
        .map_err(|e| ActionError::Transport(format!("snapshot script failed: {e}")))?;
    let raw = result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .ok_or_else(|| ActionError::Transport("snapshot script returned nothing".to_string()))?;
    decode_snapshot(&raw)
}

/// Parse the script's JSON output, capping the visible text.
pub fn decode_snapshot(raw: &str) -> Result<PageSnapshot, ActionError> {
    let mut snapshot: PageSnapshot = serde_json::from_str(raw)
        .map_err(|e| ActionError::Transport(format!("malformed snapshot: {e}")))?;
    if snapshot.visible_text.chars().count() > VISIBLE_TEXT_MAX_CHARS {
        snapshot.visible_text = snapshot
            .visible_text
            .chars()
            .take(VISIBLE_TEXT_MAX_CHARS)
            .collect();
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_snapshot() {
        let raw = r#"{
            "url": "https://example.com/login",
            "title": "Sign in",
            "description": "",
            "visible_text": "Welcome back",
            "interactive_elements": [
                {"tag": "input", "text": "", "selector": "[data-eid=\"e0\"]", "is_visible": true, "is_clickable": true}
            ],
            "links": [],
            "forms": [{"action": "/session", "method": "post", "inputs": [{"kind": "password", "name": "pw"}], "submit_text": "Sign in"}],
            "buttons": [
                {"tag": "button", "text": "Sign in", "selector": "[data-eid=\"e1\"]", "is_visible": true, "is_clickable": true}
            ]
        }"#;
        let snapshot = decode_snapshot(raw).unwrap();
        assert_eq!(snapshot.title, "Sign in");
        assert_eq!(snapshot.forms[0].inputs[0].kind, "password");
        assert_eq!(snapshot.forms[0].inputs[0].placeholder, "");
        assert_eq!(snapshot.element_text("[data-eid=\"e1\"]"), Some("Sign in"));
    }

    #[test]
    fn test_visible_text_is_capped() {
        let long = "ж".repeat(VISIBLE_TEXT_MAX_CHARS + 50);
        let raw = serde_json::json!({ "url": "about:blank", "visible_text": long }).to_string();
        let snapshot = decode_snapshot(&raw).unwrap();
        assert_eq!(snapshot.visible_text.chars().count(), VISIBLE_TEXT_MAX_CHARS);
        assert!(snapshot.links.is_empty());
    }

    #[test]
    fn test_malformed_snapshot_is_transport_error() {
        assert!(matches!(
            decode_snapshot("undefined"),
            Err(ActionError::Transport(_))
        ));
    }
}
