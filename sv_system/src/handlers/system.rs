use async_trait::async_trait;
use chrono::{Datelike, Local, Timelike};

use crate::data::HandlerResponse;
use crate::handlers::{Handler, HandlerContext};
use crate::nlu::{Intent, NluResult};

#[derive(Default)]
pub struct SystemHandler;

impl SystemHandler {
    pub fn new() -> Self {
        Self
    }

    fn time_response() -> HandlerResponse {
        let now = Local::now();
        let weekday = [
            "星期一", "星期二", "星期三", "星期四", "星期五", "星期六", "星期日",
        ][now.weekday().num_days_from_monday() as usize];

        HandlerResponse::say(format!(
            "现在是{}月{}日 {weekday} {}点{}分",
            now.month(),
            now.day(),
            now.hour(),
            now.minute()
        ))
    }
}

#[async_trait]
impl Handler for SystemHandler {
    async fn handle(
        &self,
        nlu: &NluResult,
        _device_id: &str,
        _context: &HandlerContext,
    ) -> eyre::Result<HandlerResponse> {
        match nlu.intent {
            Intent::SystemTime => Ok(Self::time_response()),
            Intent::SystemWeather => Ok(HandlerResponse::say(
                "抱歉，天气查询功能正在开发中，暂时无法为你查询天气",
            )),
            _ => Ok(HandlerResponse::say("这个功能暂时不支持")),
        }
    }
}
