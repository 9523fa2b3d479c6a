pub mod facebook_feed;
pub mod github_repos;
pub mod hackernews_feed;
pub mod helpers;
pub mod market_info;
pub mod news_brief;
pub mod twitter_feed;

pub use facebook_feed::parse_facebook_feed;
pub use github_repos::parse_github_repos;
pub use hackernews_feed::parse_hackernews_feed;
pub use helpers::*;
pub use market_info::parse_market_info;
pub use news_brief::parse_news_brief;
pub use twitter_feed::parse_twitter_feed;
pub mod linkedin_profile;
pub use linkedin_profile::parse_linkedin_profile;
