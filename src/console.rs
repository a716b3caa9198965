//! Interactive console menu driving the acquisition strategies.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::auth::authority::{select_authority, AuthorityDescriptor};
use crate::auth::coordinator::{AcquisitionCoordinator, AuthenticationResult, TokenSource};
use crate::auth::graph::GraphClient;
use crate::auth::requests::{
    DeviceCodeRequest, IntegratedAuthRequest, InteractiveRequest, Prompt, SilentRequest,
    UsernamePasswordRequest,
};
use crate::cache::{Account, SecureString};
use crate::config::Config;
use crate::error::{AppError, AuthError};

/// Page shown in the browser after sign-in for menu option 4.
pub const SUCCESS_REDIRECT: &str = "https://www.bing.com/?q=why+is+42+the+meaning+of+life";

/// Menu entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    IntegratedAuth,
    UsernamePassword,
    Interactive,
    InteractiveWithSuccessPage,
    Silent,
    B2c,
    DeviceCode,
    ClearCache,
    SwitchTenant,
    Exit,
}

impl MenuChoice {
    pub fn parse(input: &str) -> Option<Self> {
        let choice = match input.trim() {
            "1" => Self::IntegratedAuth,
            "2" => Self::UsernamePassword,
            "3" => Self::Interactive,
            "4" => Self::InteractiveWithSuccessPage,
            "5" => Self::Silent,
            "6" => Self::B2c,
            "7" => Self::DeviceCode,
            "8" => Self::ClearCache,
            "9" => Self::SwitchTenant,
            "0" => Self::Exit,
            _ => return None,
        };
        Some(choice)
    }
}

const MENU: &str = "
    1. Integrated Windows Authentication
    2. Acquire Token with Username and Password
    3. Acquire Token Interactive
    4. Acquire Token Interactive with success page
    5. Acquire Token Silently
    6. Acquire Token with B2C sign-up/sign-in policy
    7. Acquire Token with Device Code
    8. Clear Cache
    9. Switch Tenant
    0. Exit App";

/// Header, account list and options for the current authority.
pub fn render_menu(authority: &AuthorityDescriptor, accounts: &[Account]) -> String {
    let mut out = format!("Authority: {}\n", authority.canonical());
    out.push_str(&format!(
        "The token cache contains {} account(s)\n",
        accounts.len()
    ));
    for account in accounts {
        match &account.display_name {
            Some(name) => out.push_str(&format!("  Account for: {} ({})\n", account.username, name)),
            None => out.push_str(&format!("  Account for: {}\n", account.username)),
        }
    }
    out.push_str(MENU);
    out
}

/// Format duration as human-readable string (e.g., "45 min", "1 hour").
pub fn format_duration(duration: Duration) -> String {
    let total_minutes = duration.num_minutes();

    if total_minutes < 1 {
        "< 1 min".to_string()
    } else if total_minutes < 60 {
        format!("{} min", total_minutes)
    } else {
        let hours = total_minutes / 60;
        let mins = total_minutes % 60;
        if mins == 0 {
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        } else {
            format!("{}h {}m", hours, mins)
        }
    }
}

/// One-line summary of an acquisition result.
pub fn describe_result(result: &AuthenticationResult, now: chrono::DateTime<Utc>) -> String {
    let source = match result.source {
        TokenSource::Cache => "from cache",
        TokenSource::IdentityProvider => "from identity provider",
    };
    let remaining = result.expires_on - now;
    let expiry = if remaining > Duration::zero() {
        format!("expires in {}", format_duration(remaining))
    } else {
        "expired".to_string()
    };
    format!(
        "Signed in as {} ({}), scopes [{}], {}",
        result.account.username, source, result.scopes, expiry
    )
}

/// Cancels `token` when Ctrl+C is pressed, until dropped.
struct CtrlCGuard {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl CtrlCGuard {
    fn install() -> Self {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C received, cancelling sign-in");
                cancel.cancel();
            }
        });
        Self { token, task }
    }
}

impl Drop for CtrlCGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The interactive console application.
pub struct Console {
    config: Config,
    authorities: Vec<AuthorityDescriptor>,
    current: usize,
    coordinator: AcquisitionCoordinator,
    b2c: Option<AcquisitionCoordinator>,
    graph: GraphClient,
    input: Lines<BufReader<Stdin>>,
}

impl Console {
    pub fn new(
        config: Config,
        coordinator: AcquisitionCoordinator,
        b2c: Option<AcquisitionCoordinator>,
        graph: GraphClient,
    ) -> Result<Self> {
        let authorities = config
            .oauth
            .tenants
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| select_authority(&config.oauth.authority_host, t))
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid tenant in configuration")?;
        if authorities.is_empty() {
            anyhow::bail!("No tenant configured");
        }

        Ok(Self {
            config,
            authorities,
            current: 0,
            coordinator,
            b2c,
            graph,
            input: BufReader::new(tokio::io::stdin()).lines(),
        })
    }

    fn authority(&self) -> &AuthorityDescriptor {
        &self.authorities[self.current]
    }

    fn scopes(&self) -> &[String] {
        &self.config.oauth.scopes.scopes
    }

    /// Run the menu loop until the user exits, stdin closes, or Ctrl+C is
    /// pressed at a prompt.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let accounts = self.coordinator.accounts().await;
            println!("\n{}", render_menu(self.authority(), &accounts));

            let Some(line) = self.prompt("Enter your selection: ").await? else {
                break;
            };
            let Some(choice) = MenuChoice::parse(&line) else {
                println!("Unknown selection: {}", line.trim());
                continue;
            };
            if choice == MenuChoice::Exit {
                break;
            }

            if let Err(e) = self.dispatch(choice).await {
                error!("{}", e);
                println!("\n{}", e.user_message());
                if e.requires_interaction() {
                    println!("Use option 3 or 7 to sign in, then try again.");
                }
            }

            if self.prompt("\nHit ENTER to continue...").await?.is_none() {
                break;
            }
        }

        info!("Exiting");
        Ok(())
    }

    async fn dispatch(&mut self, choice: MenuChoice) -> Result<(), AppError> {
        match choice {
            MenuChoice::IntegratedAuth => {
                let username = self.username().await?;
                let organizations = select_authority(&self.config.oauth.authority_host, "organizations")?;
                let request = IntegratedAuthRequest::new(self.scopes(), &username)?
                    .with_authority(organizations);
                let result = self.coordinator.acquire_integrated(&request).await?;
                self.show(&result, true).await
            }
            MenuChoice::UsernamePassword => {
                let username = self.username().await?;
                let password = self.read_required("Password: ").await?;
                let request = UsernamePasswordRequest::new(
                    self.scopes(),
                    &username,
                    SecureString::new(password),
                )?
                .with_authority(self.authority().clone());
                #[allow(deprecated)]
                let result = self
                    .coordinator
                    .acquire_by_username_password(&request)
                    .await?;
                self.show(&result, true).await
            }
            MenuChoice::Interactive | MenuChoice::InteractiveWithSuccessPage => {
                let mut request = InteractiveRequest::new(self.scopes())?
                    .with_authority(self.authority().clone())
                    .with_prompt(Prompt::SelectAccount)
                    .with_login_hint(self.config.oauth.username.clone());
                if choice == MenuChoice::InteractiveWithSuccessPage {
                    request = request.with_success_redirect(SUCCESS_REDIRECT)?;
                }
                println!("Complete the sign-in in your browser (Ctrl+C to cancel)");
                let guard = CtrlCGuard::install();
                let result = self
                    .coordinator
                    .acquire_interactive(&request, &guard.token)
                    .await?;
                self.show(&result, true).await
            }
            MenuChoice::Silent => {
                let account = self.silent_account().await?;
                let request = SilentRequest::new(self.scopes(), account)?
                    .with_authority(self.authority().clone());
                let result = self.coordinator.acquire_silent(&request).await?;
                self.show(&result, true).await
            }
            MenuChoice::B2c => {
                let Some(b2c) = &self.b2c else {
                    return Err(AppError::Config(
                        "B2C client id not configured in [b2c]".into(),
                    ));
                };
                let request = InteractiveRequest::new(&self.config.b2c.scopes)?;
                println!("Complete the B2C sign-in in your browser (Ctrl+C to cancel)");
                let guard = CtrlCGuard::install();
                let result = b2c.acquire_interactive(&request, &guard.token).await?;
                // B2C tokens are not valid for Microsoft Graph
                self.show(&result, false).await
            }
            MenuChoice::DeviceCode => {
                let request = DeviceCodeRequest::new(self.scopes())?
                    .with_authority(self.authority().clone());
                let guard = CtrlCGuard::install();
                let result = self
                    .coordinator
                    .acquire_by_device_code(
                        &request,
                        |info| {
                            if info.message.is_empty() {
                                println!(
                                    "To sign in, open {} and enter the code {}",
                                    info.verification_uri, info.user_code
                                );
                            } else {
                                println!("{}", info.message);
                            }
                            println!("Waiting for sign-in (Ctrl+C to cancel)");
                        },
                        &guard.token,
                    )
                    .await?;
                self.show(&result, true).await
            }
            MenuChoice::ClearCache => {
                let accounts = self.coordinator.accounts().await;
                for account in &accounts {
                    self.coordinator.sign_out(account).await?;
                }
                println!("Removed {} account(s) from the cache", accounts.len());
                Ok(())
            }
            MenuChoice::SwitchTenant => {
                self.current = (self.current + 1) % self.authorities.len();
                info!("Switched authority to {}", self.authority());
                println!("Authority is now {}", self.authority().canonical());
                Ok(())
            }
            MenuChoice::Exit => Ok(()),
        }
    }

    /// The configured username's account if cached, else the first account.
    async fn silent_account(&self) -> Result<Account, AuthError> {
        let registry = self.coordinator.registry();
        let username = self.config.oauth.username.trim();
        if !username.is_empty() {
            if let Some(account) = registry.find(username).await {
                return Ok(account);
            }
        }
        registry
            .list_accounts()
            .await
            .into_iter()
            .next()
            .ok_or_else(|| {
                warn!("No accounts found, silent acquisition will fail");
                AuthError::SilentAuthRequiresInteraction("no accounts in the token cache".into())
            })
    }

    async fn username(&mut self) -> Result<String, AppError> {
        let configured = self.config.oauth.username.trim().to_string();
        if !configured.is_empty() {
            return Ok(configured);
        }
        self.read_required("Username: ").await
    }

    async fn read_required(&mut self, label: &str) -> Result<String, AppError> {
        match self.prompt(label).await {
            Ok(Some(value)) => Ok(value.trim().to_string()),
            Ok(None) => Err(AuthError::UserCancelled.into()),
            Err(e) => Err(AppError::Config(format!("Failed to read input: {}", e))),
        }
    }

    async fn show(&self, result: &AuthenticationResult, call_graph: bool) -> Result<(), AppError> {
        println!("\n{}", describe_result(result, Utc::now()));
        println!("Token is:\n {}", result.access_token.as_str());

        if !call_graph {
            return Ok(());
        }
        let profile = self.graph.get_me(result.access_token.as_str()).await?;
        println!(
            "\nResult from calling the /me endpoint of the graph:\n{}",
            serde_json::to_string_pretty(&profile).unwrap_or_default()
        );
        println!(
            "Hello {} <{}>",
            profile.display_name_or_upn(),
            profile.email()
        );
        Ok(())
    }

    /// Print `label` and read a line. `None` on end of input or Ctrl+C.
    async fn prompt(&mut self, label: &str) -> Result<Option<String>> {
        print!("{}", label);
        std::io::stdout().flush().context("Failed to flush stdout")?;

        tokio::select! {
            line = self.input.next_line() => line.context("Failed to read from stdin"),
            _ = tokio::signal::ctrl_c() => {
                println!();
                Ok(None)
            }
        }
    }
}
