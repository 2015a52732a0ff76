//! LLM-driven tool builder: generate → test → fix loop.
//!
//! Generates a tool program from a natural-language description, validates
//! it in an isolated venv with mocked host modules, installs declared
//! packages, and hot-registers the result as a custom tool. Every phase
//! emits `BUILD MCP TOOL: …` header records to the terminal.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use guenther_core::log::{LogEvent, LogSink};
use guenther_provider::ProviderTarget;

use crate::custom::{
    self, custom_tools_dir, ManifestTool, ToolManifest, MANIFEST_FILE, RUNNER_FILE, RUNNER_PY,
    TOOL_FILE,
};
use crate::descriptor::{HandlerContext, SettingsField, ToolDescriptor, ToolHandler, ToolOrigin};
use crate::error::Result;

const MAX_LOOPS: u32 = 15;
const VENV_TIMEOUT: Duration = Duration::from_secs(60);
const PIP_TIMEOUT: Duration = Duration::from_secs(120);
const TEST_TIMEOUT: Duration = Duration::from_secs(30);

const SETTINGS_INFO: &str = r#"**MCP Tool Builder**

Erstellt oder bearbeitet Custom MCP-Tools per natürlichsprachlicher Beschreibung.
Der Builder generiert den Code per LLM, testet ihn in einer isolierten venv, installiert
fehlende Pakete automatisch und korrigiert sich bei Fehlern selbst — bis zu 15 Iterationen.

Ein Code-spezialisiertes Modell (z.B. `openai/gpt-4o`, `anthropic/claude-3-5-sonnet`) empfiehlt sich für komplexe Tools."#;

/// Registry descriptor for the `build_mcp_tool` built-in.
pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "build_mcp_tool",
        "Erstellt oder bearbeitet ein Custom MCP-Tool. \
         Einfach beschreiben was das Tool tun soll — Code wird per LLM generiert, \
         in einer venv getestet, fehlende Pakete automatisch installiert und Fehler \
         bis zu 15 Mal selbstständig korrigiert. Das fertige Tool ist sofort aktiv. \
         Falls tool_name eines bestehenden Custom Tools angegeben wird: Edit-Modus.",
        json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Was soll das Tool tun? Möglichst konkret: \
                        z.B. 'Tool das YouTube Transkripte per Video-URL abruft' oder \
                        'Tool das den aktuellen Bitcoin-Preis von CoinGecko holt'"
                },
                "tool_name": {
                    "type": "string",
                    "description": "Optionaler Name (snake_case). Wird automatisch generiert wenn leer. \
                        Wenn ein bestehendes Custom Tool angegeben wird: Edit-Modus."
                }
            },
            "required": ["description"]
        }),
        Arc::new(BuildToolHandler),
        ToolOrigin::Builtin,
    )
    .with_settings_schema(vec![
        SettingsField::text(
            "model",
            "Code-Generierungs-Modell",
            "leer = Hauptmodell verwenden",
            "Optionales Modell für die Tool-Code-Generierung",
        ),
        SettingsField::text(
            "max_loops",
            "Max. Korrektur-Loops",
            "leer = 15",
            "Maximale Anzahl Selbstkorrektur-Iterationen (Standard: 15)",
        ),
    ])
    .with_settings_info(SETTINGS_INFO)
}

struct BuildToolHandler;

#[async_trait]
impl ToolHandler for BuildToolHandler {
    async fn call(&self, args: Value, ctx: &HandlerContext) -> Result<Value> {
        let description = args
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        if description.is_empty() {
            return Ok(json!({ "error": "description ist erforderlich" }));
        }
        let tool_name = args
            .get("tool_name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        Ok(build(&description, &tool_name, ctx).await)
    }
}

/// Run the full build pipeline. Always returns a result mapping, never
/// fails the turn.
pub async fn build(description: &str, tool_name: &str, ctx: &HandlerContext) -> Value {
    let log = &ctx.log;
    let tool_cfg = ctx.tool_settings("build_mcp_tool");

    // Settings are re-read per run: model and max_loops come from the
    // current tool-settings bag, not from boot-time state.
    let model = tool_cfg
        .get("model")
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| ctx.settings.model.clone());
    let max_loops: u32 = tool_cfg
        .get("max_loops")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(MAX_LOOPS);

    let target = resolve_target(ctx);
    let llm_timeout = Duration::from_secs(ctx.settings.llm_timeout);

    // ── Determine mode ────────────────────────────────────────────────────
    let mut safe_name = sanitize_name(tool_name);
    let custom_root = custom_tools_dir(&ctx.data_dir);
    let mut existing_code = String::new();
    let mut edit_mode = false;

    if !safe_name.is_empty() {
        let existing_py = custom_root.join(&safe_name).join(TOOL_FILE);
        if existing_py.is_file() {
            edit_mode = true;
            existing_code = std::fs::read_to_string(&existing_py).unwrap_or_default();
            log(LogEvent::header(format!("BUILD MCP TOOL: EDIT '{safe_name}'")));
            log(LogEvent::text("Bestehender Code als Basis geladen."));
        } else {
            log(LogEvent::header(format!("BUILD MCP TOOL: NEU '{safe_name}'")));
        }
    } else {
        log(LogEvent::header("BUILD MCP TOOL: STARTE"));
    }

    log(LogEvent::text(format!("Aufgabe: {description}")));
    log(LogEvent::text(format!("Modell: {model} | Max. Loops: {max_loops}")));

    // ── Phase 0: Plan ─────────────────────────────────────────────────────
    log(LogEvent::header("BUILD MCP TOOL: PLAN ERSTELLEN"));
    let plan = match llm_call(
        ctx,
        &target,
        &model,
        &plan_prompt(description, &safe_name, &existing_code),
        llm_timeout,
    )
    .await
    {
        Ok(raw) => parse_llm_json(&raw),
        Err(e) => {
            log(LogEvent::text(format!("Plan-LLM-Fehler (wird übersprungen): {e}")));
            None
        }
    };

    if let Some(plan) = &plan {
        if safe_name.is_empty() {
            safe_name = sanitize_name(plan.get("tool_name").and_then(Value::as_str).unwrap_or(""));
        }
        log_plan(plan, log);
    } else {
        log(LogEvent::text(
            "Kein Plan generiert — fahre direkt mit Code-Generierung fort.",
        ));
    }

    // ── Phase 1: Generate initial code ────────────────────────────────────
    log(LogEvent::header("BUILD MCP TOOL: CODE-GENERIERUNG"));
    let raw = match llm_call(
        ctx,
        &target,
        &model,
        &gen_prompt(description, &safe_name, &existing_code, plan.as_ref()),
        llm_timeout,
    )
    .await
    {
        Ok(raw) => raw,
        Err(e) => return json!({ "success": false, "error": format!("LLM-Fehler: {e}") }),
    };

    let Some(parsed) = parse_llm_json(&raw) else {
        return json!({ "success": false, "error": "LLM hat keinen gültigen Code zurückgegeben" });
    };
    let mut code = parsed
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    if code.is_empty() {
        return json!({ "success": false, "error": "LLM hat keinen gültigen Code zurückgegeben" });
    }
    let mut requirements = parsed
        .get("requirements")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();

    if safe_name.is_empty() {
        safe_name = sanitize_name(
            parsed
                .get("tool_name")
                .and_then(Value::as_str)
                .unwrap_or("custom_tool"),
        );
        if safe_name.is_empty() {
            safe_name = "custom_tool".to_string();
        }
    }

    log(LogEvent::header("BUILD MCP TOOL: GENERIERTER CODE"));
    log(LogEvent::text(truncate_for_log(&code, 1200)));
    if !requirements.is_empty() {
        log(LogEvent::text(format!(
            "Requirements: {}",
            requirements.replace('\n', ", ")
        )));
    }

    // ── Phase 2: Venv test + self-correction loop ─────────────────────────
    let tmpdir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => return json!({ "success": false, "error": format!("tempdir-Fehler: {e}") }),
    };
    let tmp = tmpdir.path();

    log(LogEvent::header("BUILD MCP TOOL: VENV ERSTELLEN"));
    let (ok, out) = run_cmd("python3", &["-m", "venv", "venv"], tmp, VENV_TIMEOUT).await;
    if !ok {
        return json!({ "success": false, "error": format!("venv-Fehler: {}", clip(&out, 300)) });
    }
    log(LogEvent::text("venv bereit."));

    let venv_python = tmp.join("venv/bin/python");
    let venv_pip = tmp.join("venv/bin/pip");

    let mut loops_used = 0;
    let mut validated = false;

    'outer: for loop_n in 1..=max_loops {
        loops_used = loop_n;
        log(LogEvent::header(format!("BUILD MCP TOOL: VERSUCH {loop_n}/{max_loops}")));

        if let Err(e) = std::fs::write(tmp.join(TOOL_FILE), &code) {
            return json!({ "success": false, "error": format!("Schreibfehler: {e}") });
        }

        if !requirements.is_empty() {
            if std::fs::write(tmp.join("requirements.txt"), &requirements).is_err() {
                return json!({ "success": false, "error": "Schreibfehler: requirements.txt" });
            }
            log(LogEvent::text(format!(
                "pip install: {}",
                requirements.replace('\n', ", ")
            )));
            let (ok, out) = run_cmd(
                venv_pip.to_string_lossy().as_ref(),
                &["install", "-r", "requirements.txt", "-q"],
                tmp,
                PIP_TIMEOUT,
            )
            .await;
            if !ok {
                let err = clip(&out, 500);
                log(LogEvent::text(format!("pip-Fehler: {err}")));
                if loop_n < max_loops {
                    if let Some(fix) = ask_fix(
                        ctx, &target, &model, description, &code, &requirements,
                        &format!("pip install failed:\n{err}"), llm_timeout,
                    )
                    .await
                    {
                        apply_fix(&fix, &mut code, &mut requirements);
                    }
                    continue 'outer;
                }
                return json!({
                    "success": false,
                    "error": format!("pip install fehlgeschlagen: {err}")
                });
            }
            log(LogEvent::text("Pakete installiert."));
        }

        if std::fs::write(tmp.join("test_runner.py"), VALIDATOR_PY).is_err() {
            return json!({ "success": false, "error": "Schreibfehler: test_runner.py" });
        }

        let (ok, out) = run_cmd(
            venv_python.to_string_lossy().as_ref(),
            &["test_runner.py"],
            tmp,
            TEST_TIMEOUT,
        )
        .await;

        if ok {
            log(LogEvent::text(format!("Test OK: {}", out.trim())));
            validated = true;
            break;
        }

        let err = clip(&out, 600);
        log(LogEvent::text(format!("Test-Fehler: {err}")));

        if loop_n >= max_loops {
            return json!({
                "success": false,
                "error": format!(
                    "Test fehlgeschlagen nach {max_loops} Versuchen.\nLetzter Fehler:\n{err}"
                )
            });
        }

        if let Some(fix) = ask_fix(
            ctx, &target, &model, description, &code, &requirements, &err, llm_timeout,
        )
        .await
        {
            apply_fix(&fix, &mut code, &mut requirements);
            log(LogEvent::header("BUILD MCP TOOL: KORRIGIERTER CODE"));
            log(LogEvent::text(truncate_for_log(&code, 800)));
            if !requirements.is_empty() {
                log(LogEvent::text(format!(
                    "Requirements: {}",
                    requirements.replace('\n', ", ")
                )));
            }
        }
    }

    if !validated {
        return json!({
            "success": false,
            "error": format!("Test fehlgeschlagen nach {max_loops} Versuchen.")
        });
    }

    // The validator writes the extracted definitions next to the code.
    let definitions: Value = std::fs::read_to_string(tmp.join("definitions.json"))
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or(Value::Null);

    // ── Phase 3: Install packages into the host interpreter ──────────────
    if !requirements.is_empty() {
        let pkgs: Vec<&str> = requirements
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        log(LogEvent::text(format!(
            "Installiere ins System-Python: {}",
            pkgs.join(", ")
        )));
        let mut args = vec!["-m", "pip", "install"];
        args.extend(pkgs.iter().copied());
        args.push("-q");
        let (ok, out) = run_cmd("python3", &args, tmp, PIP_TIMEOUT).await;
        if !ok {
            log(LogEvent::text(format!(
                "Warnung: System-pip teilweise fehlgeschlagen: {}",
                clip(&out, 300)
            )));
        }
    }

    // ── Phase 4: Write + register ─────────────────────────────────────────
    log(LogEvent::header("BUILD MCP TOOL: DEPLOY"));
    let tool_dir = custom_root.join(&safe_name);

    if edit_mode && tool_dir.join(MANIFEST_FILE).is_file() {
        let removed = custom::unregister_custom_dir(&ctx.registry, &tool_dir);
        for name in &removed {
            log(LogEvent::text(format!("Altes Tool '{name}' deregistriert")));
        }
    }

    let manifest = match manifest_from_definitions(&definitions) {
        Some(m) => m,
        None => {
            return json!({
                "success": false,
                "error": "Tool geladen, aber nicht registriert — TOOL_DEFINITION prüfen"
            });
        }
    };

    if let Err(e) = write_tool_dir(&tool_dir, &code, &manifest) {
        return json!({ "success": false, "error": format!("Deploy-Fehler: {e}") });
    }

    let registered = match custom::register_custom_dir(&ctx.registry, &tool_dir) {
        Ok(names) if !names.is_empty() => names,
        _ => {
            if !edit_mode {
                let _ = std::fs::remove_dir_all(&tool_dir);
            }
            return json!({
                "success": false,
                "error": "Tool geladen, aber nicht registriert — TOOL_DEFINITION prüfen"
            });
        }
    };
    log(LogEvent::text(format!(
        "'{safe_name}' registriert ({} Tool(s))",
        registered.len()
    )));

    // ── Phase 5: Plan verification ────────────────────────────────────────
    if let Some(plan) = &plan {
        verify_plan(plan, &safe_name, &manifest, &requirements, log);
    }

    log(LogEvent::header("BUILD MCP TOOL: FERTIG"));

    let has_settings = manifest
        .tools
        .iter()
        .any(|t| !t.settings_schema.is_empty());

    json!({
        "success": true,
        "tool_name": safe_name,
        "registered_tools": registered,
        "mode": if edit_mode { "edit" } else { "create" },
        "loops_used": loops_used,
        "has_settings": has_settings,
        "hint": format!(
            "Tool '{}' ist jetzt aktiv. {}",
            registered[0],
            if has_settings {
                "Konfigurierbare Einstellungen (z.B. API-Key) findest du unter Einstellungen → MCP Tools."
            } else {
                ""
            }
        ),
    })
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn resolve_target(ctx: &HandlerContext) -> ProviderTarget {
    let mut target = ctx.default_target();
    if target.api_key.is_empty() {
        target.api_key = ctx.default_api_key();
    }
    target
}

async fn llm_call(
    ctx: &HandlerContext,
    target: &ProviderTarget,
    model: &str,
    prompt: &str,
    timeout: Duration,
) -> std::result::Result<String, String> {
    let messages = vec![json!({ "role": "user", "content": prompt })];
    let completion = ctx
        .llm
        .chat(target, model, &messages, None, 0.1, timeout)
        .await
        .map_err(|e| e.to_string())?;
    if let Some(usage) = completion.usage {
        (ctx.log)(LogEvent::text(format!(
            "Tokens: prompt={} completion={}",
            usage.prompt_tokens, usage.completion_tokens
        )));
    }
    Ok(completion.content)
}

async fn ask_fix(
    ctx: &HandlerContext,
    target: &ProviderTarget,
    model: &str,
    description: &str,
    code: &str,
    requirements: &str,
    error: &str,
    timeout: Duration,
) -> Option<Value> {
    let prompt = fix_prompt(description, code, requirements, error);
    match llm_call(ctx, target, model, &prompt, timeout).await {
        Ok(raw) => parse_llm_json(&raw),
        Err(e) => {
            (ctx.log)(LogEvent::text(format!("Fix-LLM-Fehler: {e}")));
            None
        }
    }
}

fn apply_fix(fix: &Value, code: &mut String, requirements: &mut String) {
    if let Some(new_code) = fix.get("code").and_then(Value::as_str) {
        if !new_code.trim().is_empty() {
            *code = new_code.trim().to_string();
        }
    }
    if let Some(new_req) = fix.get("requirements").and_then(Value::as_str) {
        *requirements = new_req.trim().to_string();
    }
}

/// Lowercase and replace everything outside `[a-z0-9_]`.
pub fn sanitize_name(name: &str) -> String {
    let trimmed = name.trim().to_lowercase();
    if trimmed.is_empty() {
        return String::new();
    }
    trimmed
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' { c } else { '_' })
        .collect()
}

/// Parse JSON from an LLM response, stripping markdown wrappers; falls back
/// to the outermost brace span.
pub fn parse_llm_json(text: &str) -> Option<Value> {
    let mut text = text.trim();
    if text.starts_with("```") {
        // Drop the opening fence line and a trailing fence.
        text = text.split_once('\n').map(|(_, rest)| rest).unwrap_or(text);
        if let Some(end) = text.rfind("```") {
            text = &text[..end];
        }
        text = text.trim();
    }
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return v.is_object().then_some(v);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .filter(Value::is_object)
}

fn clip(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    if trimmed.len() <= max {
        trimmed.to_string()
    } else {
        let mut end = max;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        trimmed[..end].to_string()
    }
}

fn truncate_for_log(code: &str, max: usize) -> String {
    if code.len() > max {
        format!("{} …[gekürzt]", clip(code, max))
    } else {
        code.to_string()
    }
}

async fn run_cmd(program: &str, args: &[&str], cwd: &Path, timeout: Duration) -> (bool, String) {
    let fut = tokio::process::Command::new(program)
        .args(args)
        .current_dir(cwd)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stderr).to_string();
            combined.push_str(&String::from_utf8_lossy(&output.stdout));
            (output.status.success(), combined)
        }
        Ok(Err(e)) => (false, format!("spawn failed: {e}")),
        Err(_) => (false, format!("timed out after {timeout:?}")),
    }
}

fn write_tool_dir(dir: &Path, code: &str, manifest: &ToolManifest) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(TOOL_FILE), code)?;
    std::fs::write(dir.join(RUNNER_FILE), RUNNER_PY)?;
    let manifest_json = serde_json::to_string_pretty(manifest)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(dir.join(MANIFEST_FILE), manifest_json)?;
    Ok(())
}

/// Build the manifest from the definitions the validator extracted.
fn manifest_from_definitions(definitions: &Value) -> Option<ToolManifest> {
    let tools = definitions.get("tools")?.as_array()?;
    if tools.is_empty() {
        return None;
    }
    let usage = definitions
        .get("usage")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let settings_schema: Vec<SettingsField> = definitions
        .get("settings_schema")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let manifest_tools = tools
        .iter()
        .filter_map(|t| {
            Some(ManifestTool {
                name: t.get("name")?.as_str()?.to_string(),
                description: t
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                usage: usage.clone(),
                input_schema: t
                    .get("input_schema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                settings_schema: settings_schema.clone(),
                agent_overridable: true,
            })
        })
        .collect::<Vec<_>>();

    if manifest_tools.is_empty() {
        return None;
    }
    Some(ToolManifest {
        command: "python3".to_string(),
        args: vec![RUNNER_FILE.to_string()],
        settings_info: None,
        tools: manifest_tools,
    })
}

fn log_plan(plan: &Value, log: &LogSink) {
    log(LogEvent::header("BUILD MCP TOOL: PLAN"));
    let get = |k: &str| plan.get(k).and_then(Value::as_str).unwrap_or("?").to_string();
    log(LogEvent::text(format!("Tool-Name : {}", get("tool_name"))));
    log(LogEvent::text(format!("Aufgabe   : {}", get("summary"))));
    log(LogEvent::text(format!("Usage     : {}", clip(&get("usage"), 120))));

    if let Some(params) = plan.get("parameters").and_then(Value::as_array) {
        if !params.is_empty() {
            let line = params
                .iter()
                .map(|p| {
                    format!(
                        "{} ({}{})",
                        p.get("name").and_then(Value::as_str).unwrap_or("?"),
                        p.get("type").and_then(Value::as_str).unwrap_or("?"),
                        if p.get("required").and_then(Value::as_bool).unwrap_or(false) {
                            "*"
                        } else {
                            ""
                        }
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            log(LogEvent::text(format!("Parameter : {line}  (* = required)")));
        }
    }

    let libs = plan
        .get("libraries")
        .and_then(Value::as_array)
        .map(|l| {
            l.iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    log(LogEvent::text(format!(
        "Libraries : {}",
        if libs.is_empty() { "keine (nur stdlib)" } else { &libs }
    )));
    log(LogEvent::text(format!("Signatur  : {}", get("handler_signature"))));
    log(LogEvent::text(format!("Vorgehen  : {}", get("approach"))));
    log(LogEvent::text(format!(
        "Settings  : {}",
        if plan.get("has_settings").and_then(Value::as_bool).unwrap_or(false) {
            "ja"
        } else {
            "nein"
        }
    )));
}

fn verify_plan(
    plan: &Value,
    actual_name: &str,
    manifest: &ToolManifest,
    requirements: &str,
    log: &LogSink,
) {
    log(LogEvent::header("BUILD MCP TOOL: PLAN-VERIFIKATION"));
    let mut ok = true;

    let planned_name = sanitize_name(plan.get("tool_name").and_then(Value::as_str).unwrap_or(""));
    if !planned_name.is_empty() && planned_name != actual_name {
        log(LogEvent::text(format!(
            "⚠ Tool-Name: geplant='{planned_name}' gebaut='{actual_name}'"
        )));
        ok = false;
    } else {
        log(LogEvent::text(format!("✓ Tool-Name: {actual_name}")));
    }

    let installed: Vec<String> = requirements
        .lines()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect();
    if let Some(libs) = plan.get("libraries").and_then(Value::as_array) {
        for lib in libs.iter().filter_map(Value::as_str) {
            let base = lib
                .split(['>', '=', '<', '!'])
                .next()
                .unwrap_or(lib)
                .trim()
                .to_lowercase();
            if installed.iter().any(|inst| inst.contains(&base)) {
                log(LogEvent::text(format!("✓ Library : {lib}")));
            } else {
                log(LogEvent::text(format!(
                    "~ Library : {lib} (nicht in requirements — ggf. schon vorinstalliert)"
                )));
            }
        }
    }

    match manifest.tools.first().and_then(|t| t.usage.as_deref()) {
        Some(usage) => log(LogEvent::text(format!("✓ USAGE    : {}", clip(usage, 80)))),
        None => log(LogEvent::text("~ USAGE    : nicht vorhanden")),
    }

    log(LogEvent::text(format!(
        "Verifikation abgeschlossen.{}",
        if ok { " Alles planmäßig." } else { " Abweichungen siehe oben." }
    )));
}

// ── Prompts ──────────────────────────────────────────────────────────────

fn plan_prompt(description: &str, tool_name: &str, existing_code: &str) -> String {
    let name_hint = if tool_name.is_empty() {
        String::new()
    } else {
        format!("\nTool name to use: \"{tool_name}\"")
    };
    let edit_section = if existing_code.is_empty() {
        String::new()
    } else {
        format!("\n\nEXISTING CODE:\n```python\n{existing_code}\n```")
    };
    format!(
        r#"You are planning the implementation of an MCP tool for Guenther, a self-hosted AI agent.

TASK: {description}{name_hint}{edit_section}

Create a concise implementation plan. Respond ONLY with JSON:
{{
  "tool_name": "snake_case_name",
  "summary": "One sentence: what this tool does",
  "usage": "Short guide for the AI model: parameter examples, typical calls, accepted formats. E.g.: 'Call with url=<full URL>. Example: {{"url": "https://example.com"}}'",
  "parameters": [
    {{"name": "param_name", "type": "string|integer|number|boolean", "required": true, "description": "..."}}
  ],
  "libraries": ["package1", "package2"],
  "has_settings": false,
  "handler_signature": "def handler(param1, param2='default'):",
  "approach": "Brief step-by-step: how the handler will work"
}}

CRITICAL for handler_signature:
- Use the exact parameter names from the schema, as keyword arguments
- NEVER write def handler(params) or def handler(data)
- Example for a URL tool: "def handler(url):"
- Example with optional: "def handler(query, max_results=10):"

The "usage" field should help the AI model know how to call the tool correctly:
- Include a concrete example call (JSON parameters)
- Mention accepted formats (e.g. ISO date, full URL, IATA code)
- Keep it short (2-4 sentences or bullet points)
"#
    )
}

fn gen_prompt(
    description: &str,
    tool_name: &str,
    existing_code: &str,
    plan: Option<&Value>,
) -> String {
    let name_hint = if tool_name.is_empty() {
        String::new()
    } else {
        format!("\nUse this exact tool_name in your response: \"{tool_name}\"")
    };
    let edit_section = if existing_code.is_empty() {
        String::new()
    } else {
        format!(
            "\n\nEXISTING CODE (modify as needed based on the description):\n```python\n{existing_code}\n```"
        )
    };
    let plan_section = match plan {
        Some(plan) => {
            let get = |k: &str| plan.get(k).and_then(Value::as_str).unwrap_or("").to_string();
            let libs = plan
                .get("libraries")
                .and_then(Value::as_array)
                .map(|l| {
                    l.iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            format!(
                "\n\nIMPLEMENTATION PLAN — follow this exactly:\n\
                 - tool_name: {}\n- handler_signature: {}\n- libraries: {}\n- approach: {}\n\
                 - parameters: {}\n- usage (for USAGE constant): {}",
                get("tool_name"),
                get("handler_signature"),
                if libs.is_empty() { "none".to_string() } else { libs },
                get("approach"),
                plan.get("parameters").cloned().unwrap_or(json!([])),
                get("usage"),
            )
        }
        None => String::new(),
    };

    format!(
        r#"You are an expert Python developer creating MCP tools for Guenther, a self-hosted AI agent.

TASK: {description}{name_hint}{edit_section}{plan_section}

Generate a complete, working tool.py following this format:

```python
# Imports — only use packages available via pip or Python stdlib
import requests  # example
from config import get_tool_settings   # only if tool needs configurable settings
from services.tool_context import get_emit_log  # only if you want terminal logging

# SETTINGS_SCHEMA — define only if the tool needs configuration (API keys, URLs, etc.)
SETTINGS_SCHEMA = [
    {{"key": "api_key", "label": "API Key", "type": "password", "placeholder": "sk-...", "description": "Your API key"}},
    {{"key": "base_url", "label": "Base URL", "type": "text", "default": "https://...", "description": "API endpoint"}},
]

# USAGE — shown to the AI model as part of the tool description
# Explain how to call the tool: accepted parameter formats, example calls, typical use cases
USAGE = """
Rufe dieses Tool mit <param>=<wert> auf.
Beispiel: {{"param": "beispiel_wert"}}
"""

TOOL_DEFINITION = {{
    "name": "tool_name",       # snake_case, descriptive, unique
    "description": "What this tool does — be specific, this text is read by the AI agent",
    "input_schema": {{
        "type": "object",
        "properties": {{
            "param": {{"type": "string", "description": "clear description for the AI"}},
            "optional_param": {{"type": "integer", "description": "optional, default 10"}}
        }},
        "required": ["param"]
    }}
}}

def handler(param, optional_param=10):
    settings = get_tool_settings("tool_name")  # only if using SETTINGS_SCHEMA
    api_key = settings.get("api_key", "")
    # ... implementation
    try:
        # actual logic
        return {{"result": "..."}}
    except Exception as e:
        return {{"error": str(e)}}
```

CRITICAL RULE — HANDLER SIGNATURE:
The handler function MUST accept the input_schema properties as individual keyword arguments.
NEVER use def handler(params) or def handler(data) or def handler(**kwargs) alone.

CORRECT:   def handler(url):                   # if input_schema has property "url"
CORRECT:   def handler(query, max_results=10): # if schema has "query" (required) and "max_results" (optional)
WRONG:     def handler(params):                # ← THIS BREAKS THE TOOL, never do this
WRONG:     def handler(data):                  # ← same problem
WRONG:     def handler(**kwargs):              # ← only acceptable if combined with explicit params

RULES:
- Use SETTINGS_SCHEMA for API keys/tokens — never hardcode credentials in code
- For HTTP requests: always set a realistic browser User-Agent header
- Handle all errors with try/except, return {{"error": "message"}} on failure
- Keep the handler focused — do one thing well
- List ALL non-stdlib packages needed in requirements (one per line)
- Do not import from guenther internals except config.get_tool_settings and services.tool_context.get_emit_log

Respond ONLY with valid JSON (no text before or after, no markdown wrapping):
{{
  "tool_name": "snake_case_name",
  "code": "complete tool.py content as a single string with \n for newlines",
  "requirements": "package1\npackage2"
}}"#
    )
}

fn fix_prompt(description: &str, code: &str, requirements: &str, error: &str) -> String {
    format!(
        r#"You are debugging an MCP tool for Guenther. Fix the code based on the error.

TASK: {description}

CURRENT CODE:
```python
{code}
```

CURRENT REQUIREMENTS: {req}

ERROR:
{error}

Common fixes:
- ModuleNotFoundError / ImportError: add the missing package to requirements, fix the import
- AttributeError on mock: the code uses an internal module incorrectly — simplify imports
- AssertionError "Missing TOOL_DEFINITION": make sure TOOL_DEFINITION is at module level, not inside a function
- AssertionError "No callable handler": define a `handler` function or a function named after the tool
- AssertionError "wrong signature" / "missing parameter": handler must accept keyword arguments
  matching input_schema properties. NEVER use def handler(params) or def handler(data).
  CORRECT: def handler(url) for schema property "url"
  CORRECT: def handler(query, limit=10) for properties "query" and "limit"
- pip install failed: use a different package name or version, or find an alternative library

Respond ONLY with valid JSON:
{{
  "code": "fixed complete tool.py",
  "requirements": "updated requirements, one package per line"
}}"#,
        req = if requirements.is_empty() { "(none)" } else { requirements },
    )
}

/// Validator script run inside the sandbox venv. Mocks host-internal
/// modules, loads the candidate, asserts the structural contract, checks
/// the handler signature against the schema, and writes the extracted
/// definitions to definitions.json for the deploy phase.
const VALIDATOR_PY: &str = r#"
import sys
import json
import types
import inspect
import importlib.util


class _FlexMod(types.ModuleType):
    """Module mock that allows any attribute access without AttributeError."""
    def __getattr__(self, name):
        child = _FlexMod(f"{self.__name__}.{name}")
        setattr(self, name, child)
        return child
    def __call__(self, *a, **kw):
        return None


def _mock(name, **attrs):
    m = _FlexMod(name)
    for k, v in attrs.items():
        setattr(m, k, v)
    return m


# Register mocks for all guenther-internal modules
sys.modules['config'] = _mock('config',
    DATA_DIR='/tmp',
    get_settings=lambda: {},
    get_tool_settings=lambda n: {},
    save_tool_settings=lambda n, v: None,
)
sys.modules['services'] = _mock('services')
sys.modules['services.tool_context'] = _mock('services.tool_context',
    get_emit_log=lambda: None,
    set_emit_log=lambda fn: None)

# Load tool.py
spec = importlib.util.spec_from_file_location('tool_under_test', 'tool.py')
mod = importlib.util.module_from_spec(spec)
spec.loader.exec_module(mod)

# Validate structure
td = getattr(mod, 'TOOL_DEFINITION', None)
tds = getattr(mod, 'TOOL_DEFINITIONS', None)

assert td is not None or tds is not None, \
    "Missing TOOL_DEFINITION or TOOL_DEFINITIONS at module level"


def _check_handler(t):
    h = getattr(mod, 'handler', None) or getattr(mod, t['name'], None)
    handlers = getattr(mod, 'HANDLERS', None)
    if isinstance(handlers, dict):
        h = handlers.get(t['name']) or h
    assert h is not None, f"No callable handler found (define 'handler' or '{t['name']}')"
    assert callable(h), "handler is not callable"

    props = list(t['input_schema'].get('properties', {}).keys())
    required_params = t['input_schema'].get('required', [])
    sig = inspect.signature(h)
    sig_params = sig.parameters
    has_var_kw = any(p.kind == inspect.Parameter.VAR_KEYWORD for p in sig_params.values())
    positional = [n for n, p in sig_params.items()
                  if p.kind in (inspect.Parameter.POSITIONAL_OR_KEYWORD,
                                inspect.Parameter.POSITIONAL_ONLY,
                                inspect.Parameter.KEYWORD_ONLY)]
    # Catch def handler(params) / def handler(data) anti-pattern:
    # single arg whose name doesn't match any schema property
    if len(positional) == 1 and props and positional[0] not in props and not has_var_kw:
        assert False, (
            f"Wrong handler signature: def handler({positional[0]}) — "
            f"handler must accept keyword arguments matching input_schema properties {props}. "
            f"Fix: def handler({', '.join(props)})"
        )
    if not has_var_kw:
        for req in required_params:
            assert req in sig_params, (
                f"handler missing required parameter '{req}' from input_schema. "
                f"Fix: def handler({', '.join(props)})"
            )


definitions = []
names = []
if td is not None:
    assert isinstance(td, dict), "TOOL_DEFINITION must be a dict"
    for key in ('name', 'description', 'input_schema'):
        assert key in td, f"TOOL_DEFINITION missing required key: '{key}'"
    assert isinstance(td['input_schema'], dict), "input_schema must be a dict"
    _check_handler(td)
    definitions.append(td)
    names.append(td['name'])
else:
    assert isinstance(tds, list) and len(tds) > 0, \
        "TOOL_DEFINITIONS must be a non-empty list"
    for t in tds:
        for key in ('name', 'description', 'input_schema'):
            assert key in t, f"TOOL_DEFINITIONS entry missing '{key}'"
        _check_handler(t)
        definitions.append(t)
        names.append(t['name'])

usage = getattr(mod, 'USAGE', None)
if usage is None:
    print("WARNING: No USAGE constant defined", file=sys.stderr)

with open('definitions.json', 'w') as f:
    json.dump({
        "tools": definitions,
        "settings_schema": getattr(mod, 'SETTINGS_SCHEMA', None),
        "usage": usage,
    }, f, ensure_ascii=False)

print(f"OK|{','.join(names)}|{definitions[0]['description'][:70]}")
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_handles_spaces_and_specials() {
        assert_eq!(sanitize_name("My Cool Tool!"), "my_cool_tool_");
        assert_eq!(sanitize_name("bitcoin_price"), "bitcoin_price");
        assert_eq!(sanitize_name("  "), "");
    }

    #[test]
    fn parse_llm_json_plain_object() {
        let v = parse_llm_json(r#"{"tool_name":"x","code":"pass"}"#).unwrap();
        assert_eq!(v["tool_name"], "x");
    }

    #[test]
    fn parse_llm_json_strips_fences() {
        let raw = "```json\n{\"code\": \"print(1)\"}\n```";
        let v = parse_llm_json(raw).unwrap();
        assert_eq!(v["code"], "print(1)");
    }

    #[test]
    fn parse_llm_json_brace_fallback() {
        let raw = "Here is the result: {\"a\": 1} — done.";
        let v = parse_llm_json(raw).unwrap();
        assert_eq!(v["a"], 1);
        assert!(parse_llm_json("no json here").is_none());
    }

    #[test]
    fn manifest_from_definitions_maps_fields() {
        let defs = json!({
            "tools": [{
                "name": "btc_price",
                "description": "Holt den Bitcoin-Preis",
                "input_schema": {"type":"object","properties":{"currency":{"type":"string"}},"required":[]}
            }],
            "settings_schema": [{"key":"api_key","label":"API Key","type":"password"}],
            "usage": "Beispiel: {}"
        });
        let manifest = manifest_from_definitions(&defs).unwrap();
        assert_eq!(manifest.tools.len(), 1);
        assert_eq!(manifest.tools[0].name, "btc_price");
        assert_eq!(manifest.tools[0].settings_schema.len(), 1);
        assert_eq!(manifest.tools[0].usage.as_deref(), Some("Beispiel: {}"));
        assert_eq!(manifest.command, "python3");
    }

    #[test]
    fn manifest_from_definitions_rejects_empty() {
        assert!(manifest_from_definitions(&json!({"tools": []})).is_none());
        assert!(manifest_from_definitions(&Value::Null).is_none());
    }

    #[test]
    fn apply_fix_keeps_old_code_when_missing() {
        let mut code = "old".to_string();
        let mut req = "requests".to_string();
        apply_fix(&json!({"requirements": ""}), &mut code, &mut req);
        assert_eq!(code, "old");
        assert_eq!(req, "");

        apply_fix(&json!({"code": "new"}), &mut code, &mut req);
        assert_eq!(code, "new");
    }
}
