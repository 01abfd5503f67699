use crate::repository::Repository;
use crate::service::ChallengeService;

#[derive(Clone)]
pub struct AppState {
    pub service: ChallengeService,
}

impl AppState {
    pub fn new(service: ChallengeService) -> Self {
        Self { service }
    }

    pub fn repo(&self) -> &Repository {
        self.service.repository()
    }
}
