/*
 * aliasrelay email alias relay
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
/// The bodies of the notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Template {
    /// The quota of the owner of a custom domain is reached.
    CannotCreateAliasDomain,
    /// The quota of the owner of a directory is reached.
    CannotCreateAliasDirectory,
    ///
    CannotCreateAliasDirectoryDisabled,
    /// The owner of the domain or of the directory is disabled.
    CannotCreateAliasUserDisabled,
    /// A mailbox sent a message to its own alias.
    Cycle,
    ///
    MailboxIsAlias,
    /// Copy of a forwarded message for the other mailboxes of the alias.
    FanOutForward,
    /// Copy of a reply for the other mailboxes of the alias.
    FanOutReply,
    ///
    BounceForward,
    ///
    AliasDisabledByBounces,
    ///
    BounceReply,
    ///
    SpamForward,
    ///
    SpamReply,
    ///
    ReverseAliasUnknownMailbox,
    ///
    NonReverseAliasReply,
    ///
    FromAddressIsReverseAlias,
    ///
    ToNoreply,
    ///
    ComplaintTransactional,
    ///
    ComplaintForward,
    ///
    ComplaintReply,
    ///
    UnsubscribeDisableAlias,
    ///
    UnsubscribeBlockContact,
    ///
    UnsubscribeNewsletter,
    /// A reply could not be delivered.
    ReplyError,
    /// A forwarded message could not be delivered.
    ForwardFailed,
}

/// Produce the body of a notification from its template and a context.
pub trait Renderer: Send + Sync {
    /// The `{{ key }}` expressions of the template are replaced by the values of `context`.
    fn render(&self, template: Template, context: &[(&str, &str)]) -> String;
}

/// Built-in plain text templates, rendered with minijinja.
///
/// The values are substituted once, a value looking like an expression is
/// written as is.
#[derive(Debug)]
pub struct DefaultRenderer {
    env: minijinja::Environment<'static>,
}

impl Default for DefaultRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultRenderer {
    ///
    #[must_use]
    pub fn new() -> Self {
        let mut env = minijinja::Environment::new();
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Lenient);
        Self { env }
    }

    const fn source(template: Template) -> &'static str {
        match template {
            Template::CannotCreateAliasDomain => {
                "An email was sent to the alias {{ alias }} on your domain {{ domain }}.\n\
                 It could not be created on the fly as your alias quota is reached.\n\
                 Please upgrade your plan or delete some aliases."
            }
            Template::CannotCreateAliasDirectory => {
                "An email was sent to the alias {{ alias }} of your directory {{ directory }}.\n\
                 It could not be created on the fly as your alias quota is reached.\n\
                 Please upgrade your plan or delete some aliases."
            }
            Template::CannotCreateAliasDirectoryDisabled => {
                "An email was sent to the alias {{ alias }} of your directory {{ directory }}.\n\
                 It could not be created on the fly as the directory is disabled."
            }
            Template::CannotCreateAliasUserDisabled => {
                "An email was sent to the alias {{ alias }}.\n\
                 It could not be created on the fly as your account is disabled."
            }
            Template::Cycle => {
                "An email was sent to the alias {{ alias }} from its own mailbox {{ mailbox }}.\n\
                 The email is not forwarded to avoid an endless loop.\n\
                 To send an email from your alias, use the reverse alias of a contact instead."
            }
            Template::MailboxIsAlias => {
                "The mailbox {{ mailbox }} of your alias {{ alias }} is on the same domain as the alias.\n\
                 Emails cannot be forwarded to it. Please use another mailbox."
            }
            Template::FanOutForward => {
                "An email from {{ sender }} was sent to your alias {{ alias }}.\n\
                 It has been forwarded to your mailbox {{ mailbox }}, this mailbox also owns the alias."
            }
            Template::FanOutReply => {
                "Your mailbox {{ mailbox }} replied to {{ recipient }} from your alias {{ alias }}.\n\
                 This notification is sent to every other mailbox of the alias."
            }
            Template::BounceForward => {
                "An email sent from {{ contact }} to your alias {{ alias }} cannot be delivered to \
                 your mailbox {{ mailbox }}.\n\
                 The email is kept in your dashboard: {{ refused_email_url }}\n\
                 If this happens too often, the alias will be disabled."
            }
            Template::AliasDisabledByBounces => {
                "Your alias {{ alias }} has been disabled as emails sent to it bounced many \
                 times on your mailbox {{ mailbox }}.\n\
                 You can enable it again on {{ url }}."
            }
            Template::BounceReply => {
                "Your email sent from your alias {{ alias }} to {{ contact }} cannot be delivered.\n\
                 The email is kept in your dashboard: {{ refused_email_url }}"
            }
            Template::SpamForward => {
                "An email sent from {{ website }} to your alias {{ alias }} is detected as spam.\n\
                 It has not been forwarded, it is kept in your dashboard: {{ refused_email_url }}"
            }
            Template::SpamReply => {
                "An email sent from your alias {{ alias }} to {{ website }} is detected as spam.\n\
                 It has not been sent, it is kept in your dashboard: {{ refused_email_url }}"
            }
            Template::ReverseAliasUnknownMailbox => {
                "The reverse alias {{ reverse_alias }} was used by {{ sender }}.\n\
                 It can only be used by the mailboxes of the alias {{ alias }}, the email is not sent."
            }
            Template::NonReverseAliasReply => {
                "Your email from the alias {{ alias }} was sent to {{ recipient }}, which is not a \
                 reverse alias.\n\
                 To contact someone from your alias, create a contact for it first."
            }
            Template::FromAddressIsReverseAlias => {
                "An email was sent from the reverse alias {{ reverse_alias }}.\n\
                 Reverse aliases are only meant to receive emails."
            }
            Template::ToNoreply => {
                "An email was sent to {{ noreply }}, this address does not accept emails.\n\
                 Please contact {{ support_name }} through {{ url }}."
            }
            Template::ComplaintTransactional => {
                "Your email provider {{ provider }} reported one of our emails as spam.\n\
                 Please mark our emails as not spam so you keep receiving them."
            }
            Template::ComplaintForward => {
                "Your email provider {{ provider }} reported an email sent to your alias {{ alias }} \
                 as spam.\n\
                 If you do not want to receive emails from this sender, block it on {{ url }}."
            }
            Template::ComplaintReply => {
                "The email provider {{ provider }} of {{ recipient }} reported an email sent from your \
                 alias {{ alias }} as spam."
            }
            Template::UnsubscribeDisableAlias => {
                "Your alias {{ alias }} has been disabled, you can enable it again on {{ url }}."
            }
            Template::UnsubscribeBlockContact => {
                "Emails from {{ contact }} to your alias {{ alias }} are now blocked, you can unblock \
                 them on {{ url }}."
            }
            Template::UnsubscribeNewsletter => {
                "You have been unsubscribed from the newsletter of {{ support_name }}."
            }
            Template::ReplyError => {
                "Your email sent from your alias {{ alias }} to {{ contact }} could not be delivered.\n\
                 {{ error }}"
            }
            Template::ForwardFailed => {
                "An email sent to your alias {{ alias }} could not be delivered to your mailbox \
                 {{ mailbox }}.\n\
                 {{ error }}"
            }
        }
    }
}

impl Renderer for DefaultRenderer {
    fn render(&self, template: Template, context: &[(&str, &str)]) -> String {
        let source = Self::source(template);
        let context = context
            .iter()
            .copied()
            .collect::<std::collections::BTreeMap<&str, &str>>();

        match self
            .env
            .render_named_str(&template.to_string(), source, context)
        {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(%error, %template, "Template cannot be rendered.");
                source.to_string()
            }
        }
    }
}
