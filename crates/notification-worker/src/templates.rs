//! 通知文案
//!
//! 完成通知逐项列出商品与数量，并给出两位小数的总额；过期通知只说明原因。

use fulfillment_shared::events::{OrderCompletedEvent, OrderExpiredEvent};
use fulfillment_shared::models::{NOTIFICATION_MESSAGE_MAX_LEN, NotificationStatus, User};

const ITEM_SEPARATOR: &str = ", ";
const ELLIPSIS: &str = "…";

/// 通知模板引擎
pub struct NotificationTemplateEngine;

impl NotificationTemplateEngine {
    /// 邮件标题，同类通知保持一致便于客户端聚合
    pub fn render_subject(status: NotificationStatus) -> &'static str {
        match status {
            NotificationStatus::OrderCompleted => "订单已出单",
            NotificationStatus::OrderExpired => "订单已过期",
        }
    }

    /// 商品清单超出列宽时以省略号收尾，保证总额始终完整
    pub fn render_completed(user: &User, event: &OrderCompletedEvent) -> String {
        let head = format!("订单 #{} 已为用户 {} 出单，包含商品：", event.order_id, user.email);
        let tail = format!("。总计：${:.2}", event.total);
        let budget = NOTIFICATION_MESSAGE_MAX_LEN
            .saturating_sub(head.chars().count() + tail.chars().count());

        let products = Self::product_list(event, budget);
        format!("{head}{products}{tail}")
    }

    fn product_list(event: &OrderCompletedEvent, budget: usize) -> String {
        let entries: Vec<String> = event
            .items
            .iter()
            .map(|item| format!("{} (x{})", item.product_name, item.quantity))
            .collect();

        let full = entries.join(ITEM_SEPARATOR);
        if full.chars().count() <= budget {
            return full;
        }

        // 预留 ", …" 的位置
        let reserve = ITEM_SEPARATOR.chars().count() + ELLIPSIS.chars().count();
        let mut list = String::new();
        let mut used = 0;
        for entry in &entries {
            let sep = if list.is_empty() { 0 } else { ITEM_SEPARATOR.chars().count() };
            let len = entry.chars().count();
            if used + sep + len + reserve > budget {
                break;
            }
            if sep > 0 {
                list.push_str(ITEM_SEPARATOR);
            }
            list.push_str(entry);
            used += sep + len;
        }

        if !list.is_empty() {
            list.push_str(ITEM_SEPARATOR);
        }
        list.push_str(ELLIPSIS);
        list
    }

    pub fn render_expired(user: &User, event: &OrderExpiredEvent) -> String {
        format!(
            "用户 {} 的订单 #{} 因支付超时已过期。",
            user.email, event.order_id
        )
    }
}
