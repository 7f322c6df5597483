//! Conversation engine for the release request form. A session is keyed by
//! `(chat, user)` and driven by button callbacks and text messages; every
//! transition returns what to show next, so the engine itself never touches
//! the transport and stays unit-testable.

use chrono::Local;

use greenlight_core::escape::escape;
use greenlight_core::options::ProjectConfig;
use greenlight_core::telegram::InlineKeyboard;
use greenlight_core::types::TemplateType;

pub const CB_SELECT_ENV: &str = "select_env";
pub const CB_SELECT_SERVICE: &str = "select_service";
pub const CB_CONFIRM_SERVICES: &str = "confirm_service_selection";
pub const CB_CONFIRM_FORM: &str = "confirm_form";
pub const CB_CANCEL_FORM: &str = "cancel_form";
pub const CB_BRANCH_DEFAULT: &str = "branch:default";
pub const CB_BRANCH_CUSTOM: &str = "branch:custom";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormState {
    SelectingEnv,
    /// Default-vs-custom branch buttons.
    ChoosingBranch,
    /// Free-text branch input.
    InputtingBranch,
    SelectingService,
    InputtingHash,
    InputtingContent,
    InputtingAddress,
    Confirming,
}

#[derive(Debug, Clone)]
pub struct FormData {
    pub project: String,
    pub address_only: bool,
    pub apply_time: String,
    pub environment: Option<String>,
    pub branch: Option<String>,
    pub services: Vec<String>,
    /// One hash per selected service, collected in order.
    pub hashes: Vec<String>,
    pub content: Option<String>,
    pub addresses: Vec<String>,
}

#[derive(Debug)]
pub struct FormSession {
    pub state: FormState,
    pub data: FormData,
}

/// What the caller should render. `edit` asks to rewrite the triggering
/// bot message (callback turns) instead of sending a new one (text turns).
#[derive(Debug)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<InlineKeyboard>,
    pub edit: bool,
}

#[derive(Debug)]
pub enum Outcome {
    Continue(Reply),
    /// Show a blocking toast on the button and stay in the same state.
    Alert(String),
    /// The user confirmed; hand the canonical record to the dispatcher.
    Submit {
        submission_data: String,
        project: String,
        template_type: TemplateType,
    },
    Cancelled(Reply),
    /// The event does not apply to the current state.
    Ignored,
}

fn keyboard_grid(items: &[String], action: &str, per_row: usize) -> InlineKeyboard {
    let mut kb = InlineKeyboard::new();
    for chunk in items.chunks(per_row) {
        kb = kb.row(
            chunk
                .iter()
                .map(|item| (item.clone(), format!("{action}:{item}")))
                .collect(),
        );
    }
    kb
}

impl FormData {
    fn new(project: &str, address_only: bool) -> FormData {
        FormData {
            project: project.to_string(),
            address_only,
            apply_time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            environment: None,
            branch: None,
            services: Vec::new(),
            hashes: Vec::new(),
            content: None,
            addresses: Vec::new(),
        }
    }

    fn header(&self) -> &'static str {
        if self.address_only {
            "📋 申请新增节点地址"
        } else {
            "📋 申请测试环境服务发版"
        }
    }

    /// Running summary: finished steps get ✅, the current one ⏳. The chat
    /// transcript doubles as a progress indicator.
    fn summary(&self, pending: &str) -> String {
        let mut lines = vec![
            self.header().to_string(),
            String::new(),
            format!("✅ 申请时间: {}", self.apply_time),
            format!("✅ 申请项目: {}", self.project),
        ];
        if let Some(env) = &self.environment {
            lines.push(format!("✅ 申请环境: {env}"));
        }
        if !self.address_only {
            if let Some(branch) = &self.branch {
                lines.push(format!("✅ 申请发版分支: {}", escape(branch)));
            }
            if !self.services.is_empty() && !pending.starts_with("申请部署服务") {
                lines.push(format!("✅ 申请部署服务: {}", self.services.join(", ")));
            }
            if !self.hashes.is_empty() && self.hashes.len() == self.services.len() {
                lines.push(format!("✅ 申请发版hash: {}", escape(&self.hashes.join(", "))));
            }
        }
        lines.push(format!("⏳ {pending}"));
        lines.join("\n")
    }

    /// The canonical multi-line record; its field labels are the parsing
    /// contract with the orchestrators.
    pub fn submission_data(&self) -> String {
        if self.address_only {
            let mut out = vec![
                format!("申请时间: {}", self.apply_time),
                format!("申请项目: {}", self.project),
                format!("申请环境: {}", self.environment.as_deref().unwrap_or("")),
            ];
            // Display-only label: the orchestration parser must see no
            // deployable services on the address path.
            if let Some(service) = self.services.first() {
                out.push(format!("部署服务: {service}"));
            }
            out.push("申请新增地址:".to_string());
            out.extend(self.addresses.iter().cloned());
            out.join("\n")
        } else {
            [
                format!("申请时间: {}", self.apply_time),
                format!("申请项目: {}", self.project),
                format!("申请环境: {}", self.environment.as_deref().unwrap_or("")),
                format!("申请发版分支: {}", self.branch.as_deref().unwrap_or("")),
                format!("申请部署服务: {}", self.services.join(", ")),
                format!("申请发版hash: {}", self.hashes.join(", ")),
                format!(
                    "申请发版服务内容: {}",
                    self.content.as_deref().unwrap_or("")
                ),
            ]
            .join("\n")
        }
    }
}

// ── Screens ───────────────────────────────────────────────────────────────

fn env_screen(data: &FormData, cfg: &ProjectConfig, edit: bool) -> Reply {
    Reply {
        text: data.summary("申请环境: 请选择"),
        keyboard: Some(keyboard_grid(&cfg.environments, CB_SELECT_ENV, 2)),
        edit,
    }
}

fn branch_choice_screen(data: &FormData, default_branch: &str) -> Reply {
    let text = format!(
        "{}\n\n💡 选择默认分支或点击自定义输入",
        data.summary(&format!("申请发版分支: {default_branch}"))
    );
    Reply {
        text,
        keyboard: Some(
            InlineKeyboard::new()
                .row(vec![(
                    format!("✅ 使用默认: {default_branch}"),
                    CB_BRANCH_DEFAULT.to_string(),
                )])
                .row(vec![("✏️ 自定义输入".to_string(), CB_BRANCH_CUSTOM.to_string())]),
        ),
        edit: true,
    }
}

fn branch_input_screen(data: &FormData) -> Reply {
    Reply {
        text: format!(
            "{}\n\n💡 请在下方输入框中直接输入分支名称，然后发送",
            data.summary("申请发版分支: 请输入")
        ),
        keyboard: None,
        edit: true,
    }
}

fn service_screen(data: &FormData, cfg: &ProjectConfig, edit: bool) -> Reply {
    let env = data.environment.as_deref().unwrap_or("");
    let available = cfg.services.for_env(env);
    // One button per row so full service names stay readable.
    let mut kb = InlineKeyboard::new();
    for service in &available {
        let selected = data.services.contains(service);
        let label = if selected {
            format!("✓ {service}")
        } else {
            service.clone()
        };
        kb = kb.row(vec![(label, format!("{CB_SELECT_SERVICE}:{service}"))]);
    }
    kb = kb.row(vec![(
        "✅ 完成选择".to_string(),
        CB_CONFIRM_SERVICES.to_string(),
    )]);

    let selected_text = if data.services.is_empty() {
        "未选择".to_string()
    } else {
        data.services.join(", ")
    };
    Reply {
        text: format!(
            "{}\n\n💡 可多选，再次点击可取消选择",
            data.summary(&format!("申请部署服务: {selected_text}"))
        ),
        keyboard: Some(kb),
        edit,
    }
}

fn hash_prompt(data: &FormData, edit: bool) -> Reply {
    let index = data.hashes.len();
    let service = data
        .services
        .get(index)
        .map(String::as_str)
        .unwrap_or_default();
    Reply {
        text: format!(
            "{}\n\n💡 请输入 {service} 的发版hash（{}/{}），一次一个，不要使用逗号",
            data.summary(&format!("申请发版hash: 请输入 {service} 的hash")),
            index + 1,
            data.services.len()
        ),
        keyboard: None,
        edit,
    }
}

fn content_prompt(data: &FormData) -> Reply {
    Reply {
        text: format!(
            "{}\n\n💡 请在下方输入框中直接输入发版内容，然后发送",
            data.summary("申请发版服务内容: 请输入")
        ),
        keyboard: None,
        edit: false,
    }
}

fn address_prompt(data: &FormData) -> Reply {
    Reply {
        text: format!(
            "{}\n\n💡 每行一个地址，支持一次提交多个",
            data.summary("申请新增地址: 请输入")
        ),
        keyboard: None,
        edit: true,
    }
}

fn confirm_screen(data: &FormData, edit: bool) -> Reply {
    Reply {
        text: format!("📋 请确认您的申请信息：\n\n{}", escape(&data.submission_data())),
        keyboard: Some(InlineKeyboard::new().row(vec![
            ("✅ 确认提交".to_string(), CB_CONFIRM_FORM.to_string()),
            ("❌ 取消".to_string(), CB_CANCEL_FORM.to_string()),
        ])),
        edit,
    }
}

// ── Engine ────────────────────────────────────────────────────────────────

/// Start a form for the project behind an entry command.
pub fn start(project: &str, cfg: &ProjectConfig) -> (FormSession, Reply) {
    let data = FormData::new(project, cfg.address_only);
    let reply = env_screen(&data, cfg, false);
    (
        FormSession {
            state: FormState::SelectingEnv,
            data,
        },
        reply,
    )
}

pub fn handle_callback(session: &mut FormSession, data: &str, cfg: &ProjectConfig) -> Outcome {
    match session.state {
        FormState::SelectingEnv => {
            let Some(env) = data.strip_prefix(&format!("{CB_SELECT_ENV}:")) else {
                return Outcome::Ignored;
            };
            if !cfg.environments.iter().any(|e| e == env) {
                return Outcome::Ignored;
            }
            session.data.environment = Some(env.to_string());
            // Switching environment invalidates any earlier selection.
            session.data.services.clear();
            session.data.hashes.clear();

            if session.data.address_only {
                session.state = FormState::InputtingAddress;
                return Outcome::Continue(address_prompt(&session.data));
            }
            match cfg.default_branch_for(env) {
                Some(default_branch) => {
                    session.state = FormState::ChoosingBranch;
                    Outcome::Continue(branch_choice_screen(&session.data, default_branch))
                }
                None => {
                    session.state = FormState::InputtingBranch;
                    Outcome::Continue(branch_input_screen(&session.data))
                }
            }
        }

        FormState::ChoosingBranch => match data {
            CB_BRANCH_DEFAULT => {
                let env = session.data.environment.as_deref().unwrap_or("");
                session.data.branch = cfg.default_branch_for(env).map(str::to_string);
                session.state = FormState::SelectingService;
                Outcome::Continue(service_screen(&session.data, cfg, true))
            }
            CB_BRANCH_CUSTOM => {
                session.state = FormState::InputtingBranch;
                Outcome::Continue(branch_input_screen(&session.data))
            }
            _ => Outcome::Ignored,
        },

        FormState::SelectingService => {
            if data == CB_CONFIRM_SERVICES {
                if session.data.services.is_empty() {
                    return Outcome::Alert("请至少选择一个服务".to_string());
                }
                session.data.hashes.clear();
                session.state = FormState::InputtingHash;
                return Outcome::Continue(hash_prompt(&session.data, true));
            }
            let Some(service) = data.strip_prefix(&format!("{CB_SELECT_SERVICE}:")) else {
                return Outcome::Ignored;
            };
            let env = session.data.environment.as_deref().unwrap_or("");
            if !cfg.services.for_env(env).iter().any(|s| s == service) {
                return Outcome::Ignored;
            }
            if let Some(pos) = session.data.services.iter().position(|s| s == service) {
                session.data.services.remove(pos);
            } else {
                session.data.services.push(service.to_string());
            }
            Outcome::Continue(service_screen(&session.data, cfg, true))
        }

        FormState::Confirming => match data {
            CB_CONFIRM_FORM => Outcome::Submit {
                submission_data: session.data.submission_data(),
                project: session.data.project.clone(),
                template_type: if session.data.address_only {
                    TemplateType::AddressOnly
                } else {
                    TemplateType::Default
                },
            },
            CB_CANCEL_FORM => Outcome::Cancelled(Reply {
                text: "❌ 已取消提交".to_string(),
                keyboard: None,
                edit: true,
            }),
            _ => Outcome::Ignored,
        },

        _ => Outcome::Ignored,
    }
}

pub fn handle_text(session: &mut FormSession, text: &str, cfg: &ProjectConfig) -> Outcome {
    let text = text.trim();
    match session.state {
        FormState::InputtingBranch => {
            if text.is_empty() {
                return Outcome::Continue(Reply {
                    text: "❌ 分支名称不能为空，请重新输入".to_string(),
                    keyboard: None,
                    edit: false,
                });
            }
            session.data.branch = Some(text.to_string());
            session.state = FormState::SelectingService;
            Outcome::Continue(service_screen(&session.data, cfg, false))
        }

        FormState::InputtingHash => {
            // One hash per service; separators mean the user pasted a list.
            if text.is_empty() {
                return Outcome::Continue(Reply {
                    text: "❌ hash不能为空，请重新输入".to_string(),
                    keyboard: None,
                    edit: false,
                });
            }
            if text.contains(',') || text.contains('，') || text.contains('、') {
                return Outcome::Continue(Reply {
                    text: "❌ 请一次输入一个hash，不要使用逗号分隔".to_string(),
                    keyboard: None,
                    edit: false,
                });
            }
            session.data.hashes.push(text.to_string());
            if session.data.hashes.len() < session.data.services.len() {
                return Outcome::Continue(hash_prompt(&session.data, false));
            }
            session.state = FormState::InputtingContent;
            Outcome::Continue(content_prompt(&session.data))
        }

        FormState::InputtingContent => {
            if text.is_empty() {
                return Outcome::Continue(Reply {
                    text: "❌ 发版内容不能为空，请重新输入".to_string(),
                    keyboard: None,
                    edit: false,
                });
            }
            session.data.content = Some(text.to_string());
            session.state = FormState::Confirming;
            Outcome::Continue(confirm_screen(&session.data, false))
        }

        FormState::InputtingAddress => {
            let addresses: Vec<String> = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            if addresses.is_empty() {
                return Outcome::Continue(Reply {
                    text: "❌ 地址不能为空，请每行输入一个地址".to_string(),
                    keyboard: None,
                    edit: false,
                });
            }
            session.data.addresses = addresses;
            // Service comes from the env's position in the services mapping,
            // not from user selection.
            let env_index = session
                .data
                .environment
                .as_deref()
                .and_then(|env| {
                    cfg.environments
                        .iter()
                        .position(|e| e.eq_ignore_ascii_case(env))
                })
                .unwrap_or(0);
            session.data.services = cfg
                .services
                .first_service_at(env_index)
                .into_iter()
                .collect();
            session.state = FormState::Confirming;
            Outcome::Continue(confirm_screen(&session.data, false))
        }

        _ => Outcome::Ignored,
    }
}
